mod mersenne_61 {
    use ff::PrimeField;

    use crate::MpcField;

    /// Finite field mod 2^61-1.
    #[derive(PrimeField)]
    #[PrimeFieldModulus = "2305843009213693951"]
    #[PrimeFieldGenerator = "37"]
    #[PrimeFieldReprEndianness = "little"]
    pub struct Mersenne61([u64; 1]);

    impl MpcField for Mersenne61 {
        fn canonical(&self) -> u128 {
            // Raw representation [1] holds the value R^-1, which cancels
            // the Montgomery factor under multiplication.
            const R_INV: Mersenne61 = Mersenne61([1]);
            (*self * R_INV).0[0] as u128
        }
    }

    #[cfg(test)]
    mod tests {
        use crate::MpcField;

        use super::Mersenne61;

        #[test]
        fn decimal_round_trip() {
            let value = Mersenne61::from(123456789012345678);
            assert_eq!(value.to_decimal(), "123456789012345678");
            assert_eq!(Mersenne61::from_decimal("123456789012345678"), Some(value));
        }

        #[test]
        fn wraps_at_modulus() {
            let p_minus_1 = Mersenne61::from_decimal("2305843009213693950").unwrap();
            let two = Mersenne61::from(2);
            assert_eq!((p_minus_1 + two).canonical(), 1);
        }

        #[test]
        fn rejects_garbage() {
            assert_eq!(Mersenne61::from_decimal(""), None);
            assert_eq!(Mersenne61::from_decimal("12a4"), None);
        }
    }
}

mod mersenne_127 {
    use ff::PrimeField;

    use crate::MpcField;

    /// Finite field mod 2^127-1.
    #[derive(PrimeField)]
    #[PrimeFieldModulus = "170141183460469231731687303715884105727"]
    #[PrimeFieldGenerator = "43"]
    #[PrimeFieldReprEndianness = "little"]
    pub struct Mersenne127([u64; 2]);

    impl MpcField for Mersenne127 {
        fn canonical(&self) -> u128 {
            // Raw representation [1, 0] holds the value R^-1, which cancels
            // the Montgomery factor under multiplication. Lower limb is the
            // first 64 bits (little endian).
            const R_INV: Mersenne127 = Mersenne127([1, 0]);
            let limbs = (*self * R_INV).0;
            ((limbs[1] as u128) << 64) | limbs[0] as u128
        }
    }

    #[cfg(test)]
    mod tests {
        use crate::MpcField;

        use super::Mersenne127;

        #[test]
        fn decimal_round_trip() {
            let text = "1234567890123456789012345678901";
            let value = Mersenne127::from_decimal(text).unwrap();
            assert_eq!(value.canonical(), 1234567890123456789012345678901);
            assert_eq!(value.to_decimal(), text);
        }

        #[test]
        fn wraps_at_modulus() {
            let p_minus_1 =
                Mersenne127::from_decimal("170141183460469231731687303715884105726").unwrap();
            let two = Mersenne127::from(2);
            assert_eq!((p_minus_1 + two).canonical(), 1);
        }

        #[test]
        fn product_of_small_values() {
            let product = Mersenne127::from(6) * Mersenne127::from(7);
            assert_eq!(product.canonical(), 42);
        }
    }
}

pub use mersenne_127::{Mersenne127, Mersenne127Repr};
pub use mersenne_61::{Mersenne61, Mersenne61Repr};
