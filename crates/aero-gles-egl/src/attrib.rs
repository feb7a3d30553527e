//! `EGL_NONE`-terminated attribute lists.

use crate::consts::{EGLint, EGL_NONE};
use crate::error::EglError;

/// Key/value pairs up to the first `EGL_NONE` key. A slice that ends without `EGL_NONE` is
/// read to its end; a key without a value is `EGL_BAD_ATTRIBUTE`.
pub fn attribute_pairs(list: &[EGLint]) -> Result<Vec<(EGLint, EGLint)>, EglError> {
    let mut pairs = Vec::new();
    let mut rest = list;
    loop {
        match rest {
            [] => break,
            [key, ..] if *key == EGL_NONE => break,
            [key, value, tail @ ..] => {
                pairs.push((*key, *value));
                rest = tail;
            }
            [_] => return Err(EglError::BadAttribute),
        }
    }
    Ok(pairs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consts::{EGL_HEIGHT, EGL_WIDTH};

    #[test]
    fn reading_stops_at_the_terminator() {
        let list = [EGL_WIDTH, 4, EGL_NONE, EGL_HEIGHT, 8];
        assert_eq!(attribute_pairs(&list).unwrap(), vec![(EGL_WIDTH, 4)]);
        assert_eq!(attribute_pairs(&[]).unwrap(), vec![]);
        assert_eq!(
            attribute_pairs(&[EGL_WIDTH, 4, EGL_HEIGHT, 8]).unwrap(),
            vec![(EGL_WIDTH, 4), (EGL_HEIGHT, 8)]
        );
    }

    #[test]
    fn dangling_keys_are_rejected() {
        assert_eq!(attribute_pairs(&[EGL_WIDTH]), Err(EglError::BadAttribute));
    }
}
