//! Domain construction helpers.

use std::collections::BTreeSet;

use crate::state::State;

/// All states of the rectangular box `[0, shape[0]) × … × [0, shape[d-1])`.
///
/// States are produced in row-major order (last axis fastest).
pub fn from_rect(shape: &[i64]) -> Vec<State> {
    from_rect_with_origin(shape, &vec![0; shape.len()])
}

/// All states of the box `[origin[i], origin[i] + shape[i])` along each axis.
pub fn from_rect_with_origin(shape: &[i64], origin: &[i64]) -> Vec<State> {
    debug_assert_eq!(shape.len(), origin.len());
    if shape.iter().any(|&n| n <= 0) {
        return Vec::new();
    }

    let mut states = Vec::with_capacity(shape.iter().product::<i64>() as usize);
    let mut coords = origin.to_vec();
    loop {
        states.push(State::new(coords.clone()));

        // Odometer increment, last axis fastest.
        let mut axis = shape.len();
        loop {
            if axis == 0 {
                return states;
            }
            axis -= 1;
            coords[axis] += 1;
            if coords[axis] < origin[axis] + shape[axis] {
                break;
            }
            coords[axis] = origin[axis];
        }
    }
}

/// Union of state sets, sorted and deduplicated.
pub fn union<'a>(parts: impl IntoIterator<Item = &'a [State]>) -> Vec<State> {
    let merged: BTreeSet<State> = parts.into_iter().flatten().cloned().collect();
    merged.into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_rect() {
        let states = from_rect(&[2, 3]);
        assert_eq!(states.len(), 6);
        assert_eq!(states[0], State::from([0, 0]));
        assert_eq!(states[1], State::from([0, 1]));
        assert_eq!(states[5], State::from([1, 2]));
    }

    #[test]
    fn test_from_rect_with_origin() {
        let states = from_rect_with_origin(&[2], &[5]);
        assert_eq!(states, vec![State::from([5]), State::from([6])]);
        assert!(from_rect(&[3, 0]).is_empty());
    }

    #[test]
    fn test_zero_dimensional_rect() {
        let states = from_rect(&[]);
        assert_eq!(states, vec![State::empty()]);
    }

    #[test]
    fn test_union() {
        let a = from_rect(&[4, 1]);
        let b = from_rect(&[1, 4]);
        let merged = union([a.as_slice(), b.as_slice()]);
        assert_eq!(merged.len(), 7);
    }
}
