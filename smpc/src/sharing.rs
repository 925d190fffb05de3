use std::ops::{Add, Mul, Neg, Sub};

use rand::Rng;

use crate::MpcField;

/// One participant's additive share of a field element.
///
/// A share on its own carries no information about the shared value; only
/// the sum of all shares of one sharing does. Shares add, subtract and
/// scale by public field elements without communication.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AdditiveShare<T>(pub T);

impl<T: MpcField> AdditiveShare<T> {
    /// Share of zero in any sharing.
    pub fn zero() -> Self {
        AdditiveShare(T::zero())
    }
}

impl<T: MpcField> Add for AdditiveShare<T> {
    type Output = AdditiveShare<T>;
    fn add(self, rhs: Self) -> Self::Output {
        AdditiveShare(self.0 + rhs.0)
    }
}

impl<T: MpcField> Sub for AdditiveShare<T> {
    type Output = AdditiveShare<T>;
    fn sub(self, rhs: Self) -> Self::Output {
        AdditiveShare(self.0 - rhs.0)
    }
}

impl<T: MpcField> Neg for AdditiveShare<T> {
    type Output = AdditiveShare<T>;
    fn neg(self) -> Self::Output {
        AdditiveShare(-self.0)
    }
}

impl<T: MpcField> Mul<T> for AdditiveShare<T> {
    type Output = AdditiveShare<T>;
    fn mul(self, rhs: T) -> Self::Output {
        AdditiveShare(self.0 * rhs)
    }
}

/// Split `value` into `n` additive shares that sum to it.
///
/// The first `n - 1` shares are drawn uniformly from the field and the
/// last one balances the sum, so any subset of fewer than `n` shares is
/// independent of `value`. Panics if `n` is zero.
pub fn share<T: MpcField>(value: T, n: usize, rng: &mut impl Rng) -> Vec<AdditiveShare<T>> {
    assert!(n > 0, "cannot split a secret into zero shares");
    let mut shares: Vec<AdditiveShare<T>> = (1..n)
        .map(|_| AdditiveShare(T::random(&mut *rng)))
        .collect();
    let sum = shares.iter().fold(T::zero(), |acc, x| acc + x.0);
    shares.push(AdditiveShare(value - sum));
    shares
}

/// Recombine shares of one sharing into the shared value.
///
/// Order-independent sum over the field.
pub fn reconstruct<T: MpcField>(shares: impl IntoIterator<Item = AdditiveShare<T>>) -> T {
    shares.into_iter().fold(T::zero(), |acc, x| acc + x.0)
}

#[cfg(test)]
mod tests {
    use rand::thread_rng;

    use crate::fields::Mersenne61;
    use crate::MpcField;

    use super::*;

    type Fp = Mersenne61;

    #[test]
    fn reconstruction_inverts_sharing() {
        let mut rng = thread_rng();
        for n in [1, 2, 3, 7] {
            let value = Fp::from(123456789);
            let shares = share(value, n, &mut rng);
            assert_eq!(shares.len(), n);
            assert_eq!(reconstruct(shares), value);
        }
    }

    #[test]
    fn sharing_is_randomized() {
        let mut rng = thread_rng();
        let value = Fp::from(42);
        let first = share(value, 3, &mut rng);
        let second = share(value, 3, &mut rng);
        assert_ne!(first, second);
    }

    #[test]
    fn shares_are_additively_homomorphic() {
        let mut rng = thread_rng();
        let left = share(Fp::from(1000), 4, &mut rng);
        let right = share(Fp::from(337), 4, &mut rng);
        let sums: Vec<_> = left.iter().zip(right).map(|(&a, b)| a + b).collect();
        assert_eq!(reconstruct(sums).canonical(), 1337);
    }

    #[test]
    fn scaled_shares_reconstruct_to_scaled_value() {
        let mut rng = thread_rng();
        let shares = share(Fp::from(21), 3, &mut rng);
        let doubled: Vec<_> = shares.into_iter().map(|x| x * Fp::from(2)).collect();
        assert_eq!(reconstruct(doubled).canonical(), 42);
    }
}
