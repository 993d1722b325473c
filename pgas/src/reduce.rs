//! Reduction operators over basic types.

use crate::error::{Error, Result};
use crate::types::BasicType;

/// Reduction operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReduceOp {
    Min,
    Max,
    /// Elements are `(min, max)` pairs.
    MinMax,
    Sum,
    Prod,
    Land,
    Lor,
    Lxor,
    Band,
    Bor,
    Bxor,
}

impl ReduceOp {
    /// Whether `op` is defined on elements of `ty`.
    pub fn supports(self, ty: BasicType) -> bool {
        match self {
            ReduceOp::Min | ReduceOp::Max | ReduceOp::MinMax | ReduceOp::Sum | ReduceOp::Prod => {
                true
            }
            ReduceOp::Land | ReduceOp::Lor | ReduceOp::Lxor => {
                ty.is_integer() && ty != BasicType::Byte
            }
            ReduceOp::Band | ReduceOp::Bor | ReduceOp::Bxor => ty.is_integer(),
        }
    }
}

trait Element: Copy + PartialOrd {
    const SIZE: usize;
    fn load(bytes: &[u8]) -> Self;
    fn store(self, bytes: &mut [u8]);
    fn sum(self, other: Self) -> Self;
    fn prod(self, other: Self) -> Self;
}

trait Integer: Element {
    fn truth(self) -> bool;
    fn from_truth(b: bool) -> Self;
    fn band(self, other: Self) -> Self;
    fn bor(self, other: Self) -> Self;
    fn bxor(self, other: Self) -> Self;
}

macro_rules! element {
    ($ty:ty, |$a:ident, $b:ident| $sum:expr, |$c:ident, $d:ident| $prod:expr) => {
        impl Element for $ty {
            const SIZE: usize = std::mem::size_of::<$ty>();
            fn load(bytes: &[u8]) -> Self {
                let mut buf = [0u8; std::mem::size_of::<$ty>()];
                buf.copy_from_slice(bytes);
                <$ty>::from_ne_bytes(buf)
            }
            fn store(self, bytes: &mut [u8]) {
                bytes.copy_from_slice(&self.to_ne_bytes());
            }
            fn sum(self, other: Self) -> Self {
                let ($a, $b) = (self, other);
                $sum
            }
            fn prod(self, other: Self) -> Self {
                let ($c, $d) = (self, other);
                $prod
            }
        }
    };
}

macro_rules! integer {
    ($($ty:ty),*) => {$(
        element!($ty, |a, b| a.wrapping_add(b), |a, b| a.wrapping_mul(b));
        impl Integer for $ty {
            fn truth(self) -> bool {
                self != 0
            }
            fn from_truth(b: bool) -> Self {
                b as $ty
            }
            fn band(self, other: Self) -> Self {
                self & other
            }
            fn bor(self, other: Self) -> Self {
                self | other
            }
            fn bxor(self, other: Self) -> Self {
                self ^ other
            }
        }
    )*};
}

integer!(u8, i16, i32, u32, i64, u64);
element!(f32, |a, b| a + b, |a, b| a * b);
element!(f64, |a, b| a + b, |a, b| a * b);

fn fold<T: Element>(acc: &mut [u8], other: &[u8], f: impl Fn(T, T) -> T) {
    for (a, b) in acc.chunks_exact_mut(T::SIZE).zip(other.chunks_exact(T::SIZE)) {
        f(T::load(a), T::load(b)).store(a);
    }
}

fn fold_minmax<T: Element>(acc: &mut [u8], other: &[u8]) {
    for (a, b) in acc
        .chunks_exact_mut(2 * T::SIZE)
        .zip(other.chunks_exact(2 * T::SIZE))
    {
        let (a_min, a_max) = a.split_at_mut(T::SIZE);
        let (b_min, b_max) = b.split_at(T::SIZE);
        let (lo, hi) = (T::load(b_min), T::load(b_max));
        if lo < T::load(a_min) {
            lo.store(a_min);
        }
        if hi > T::load(a_max) {
            hi.store(a_max);
        }
    }
}

/// Returns `false` for operators that are not arithmetic.
fn apply_arith<T: Element>(op: ReduceOp, acc: &mut [u8], other: &[u8]) -> bool {
    match op {
        ReduceOp::Min => fold::<T>(acc, other, |a, b| if b < a { b } else { a }),
        ReduceOp::Max => fold::<T>(acc, other, |a, b| if b > a { b } else { a }),
        ReduceOp::MinMax => fold_minmax::<T>(acc, other),
        ReduceOp::Sum => fold::<T>(acc, other, T::sum),
        ReduceOp::Prod => fold::<T>(acc, other, T::prod),
        _ => return false,
    }
    true
}

fn apply_integer<T: Integer>(op: ReduceOp, acc: &mut [u8], other: &[u8]) {
    if apply_arith::<T>(op, acc, other) {
        return;
    }
    match op {
        ReduceOp::Land => fold::<T>(acc, other, |a, b| T::from_truth(a.truth() && b.truth())),
        ReduceOp::Lor => fold::<T>(acc, other, |a, b| T::from_truth(a.truth() || b.truth())),
        ReduceOp::Lxor => fold::<T>(acc, other, |a, b| T::from_truth(a.truth() != b.truth())),
        ReduceOp::Band => fold::<T>(acc, other, T::band),
        ReduceOp::Bor => fold::<T>(acc, other, T::bor),
        ReduceOp::Bxor => fold::<T>(acc, other, T::bxor),
        _ => {}
    }
}

/// A validated operator/type pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Reducer {
    op: ReduceOp,
    ty: BasicType,
}

impl Reducer {
    /// Validate `op` on `nelem` elements of `ty`.
    pub(crate) fn new(op: ReduceOp, ty: BasicType, nelem: usize) -> Result<Self> {
        if !op.supports(ty) {
            return Err(Error::invalid(format!("{op:?} is not defined on {ty:?}")));
        }
        if op == ReduceOp::MinMax && nelem % 2 != 0 {
            return Err(Error::invalid(
                "MinMax needs an even number of elements",
            ));
        }
        Ok(Self { op, ty })
    }

    /// Fold `other` into `acc` element-wise.
    pub(crate) fn apply(&self, acc: &mut [u8], other: &[u8]) {
        let op = self.op;
        match self.ty {
            BasicType::Byte => apply_integer::<u8>(op, acc, other),
            BasicType::Short => apply_integer::<i16>(op, acc, other),
            BasicType::Int => apply_integer::<i32>(op, acc, other),
            BasicType::UInt => apply_integer::<u32>(op, acc, other),
            BasicType::Long | BasicType::LongLong => apply_integer::<i64>(op, acc, other),
            BasicType::ULong | BasicType::ULongLong => apply_integer::<u64>(op, acc, other),
            BasicType::Float => {
                apply_arith::<f32>(op, acc, other);
            }
            BasicType::Double => {
                apply_arith::<f64>(op, acc, other);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{bytes_of, bytes_of_mut};

    fn reduce<T: crate::Primitive>(op: ReduceOp, a: &[T], b: &[T]) -> Vec<T> {
        let mut acc = a.to_vec();
        Reducer::new(op, T::TYPE, a.len())
            .unwrap()
            .apply(bytes_of_mut(&mut acc), bytes_of(b));
        acc
    }

    #[test]
    fn test_arithmetic() {
        assert_eq!(reduce(ReduceOp::Sum, &[1i32, -2], &[3, 4]), vec![4, 2]);
        assert_eq!(reduce(ReduceOp::Prod, &[2.5f64], &[4.0]), vec![10.0]);
        assert_eq!(reduce(ReduceOp::Min, &[5u32, 1], &[3, 9]), vec![3, 1]);
        assert_eq!(reduce(ReduceOp::Max, &[-5i64, 1], &[-3, 0]), vec![-3, 1]);
        assert_eq!(reduce(ReduceOp::Sum, &[255u8], &[2]), vec![1]);
    }

    #[test]
    fn test_minmax_pairs() {
        assert_eq!(
            reduce(ReduceOp::MinMax, &[3i32, 7, 0, 0], &[1, 5, -1, 2]),
            vec![1, 7, -1, 2]
        );
        assert!(Reducer::new(ReduceOp::MinMax, BasicType::Int, 3).is_err());
    }

    #[test]
    fn test_logical_and_bitwise() {
        assert_eq!(reduce(ReduceOp::Land, &[2i32, 0], &[5, 1]), vec![1, 0]);
        assert_eq!(reduce(ReduceOp::Lxor, &[2i16, 0], &[5, 1]), vec![0, 1]);
        assert_eq!(reduce(ReduceOp::Bor, &[0b0101u8], &[0b0011]), vec![0b0111]);
        assert_eq!(reduce(ReduceOp::Bxor, &[0b0101u64], &[0b0011]), vec![0b0110]);
    }

    #[test]
    fn test_support_matrix() {
        assert!(ReduceOp::Band.supports(BasicType::Byte));
        assert!(!ReduceOp::Land.supports(BasicType::Byte));
        assert!(!ReduceOp::Bor.supports(BasicType::Float));
        assert!(!ReduceOp::Lor.supports(BasicType::Double));
        assert!(ReduceOp::MinMax.supports(BasicType::Float));
        let err = Reducer::new(ReduceOp::Bxor, BasicType::Double, 1).unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::InvalidArgument);
    }
}
