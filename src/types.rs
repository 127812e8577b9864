// This file is part of demorec.
// Licensed under the MIT license, see LICENSE.md for details.
// SPDX-License-Identifier: MIT

//! Support for type-checking Arrow inputs.
use arrow::array::{downcast_array, Array, ArrowPrimitiveType, PrimitiveArray};

use crate::errors::{ModelError, ModelResult};

/// Downcast an Arrow array to a primitive array, checking its type.
pub(crate) fn checked_array<E: ArrowPrimitiveType + 'static>(
    name: &str,
    array: &dyn Array,
) -> ModelResult<PrimitiveArray<E>> {
    if array.data_type().equals_datatype(&E::DATA_TYPE) {
        Ok(downcast_array(array))
    } else {
        Err(ModelError::ArrayType {
            name: name.into(),
            found: format!("{}", array.data_type()),
            expected: format!("{}", E::DATA_TYPE),
        })
    }
}

/// Make sure an array has no nulls.
pub(crate) fn require_valid(name: &str, array: &dyn Array) -> ModelResult<()> {
    if array.null_count() > 0 {
        Err(ModelError::InvalidValue(format!(
            "{} array has {} nulls",
            name,
            array.null_count()
        )))
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use arrow::array::{Float32Array, Int32Array, Int64Array};
    use arrow::datatypes::{Float32Type, Int32Type};

    use super::*;

    #[test]
    fn test_checked_accepts_matching_type() {
        let arr = Int32Array::from(vec![1, 2, 3]);
        let out = checked_array::<Int32Type>("users", &arr).expect("type check failed");
        assert_eq!(out.values().to_vec(), vec![1, 2, 3]);
    }

    #[test]
    fn test_checked_rejects_wrong_type() {
        let arr = Int64Array::from(vec![1, 2, 3]);
        let res = checked_array::<Float32Type>("ratings", &arr);
        assert!(matches!(res, Err(ModelError::ArrayType { .. })));
    }

    #[test]
    fn test_require_valid_nulls() {
        let arr = Float32Array::from(vec![Some(1.0), None]);
        assert!(require_valid("ratings", &arr).is_err());
    }
}
