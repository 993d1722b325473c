//! Datatypes and the conversion plan of a transfer.

use crate::error::{Error, Result};

/// Basic element types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BasicType {
    Byte,
    Short,
    Int,
    UInt,
    Long,
    ULong,
    LongLong,
    ULongLong,
    Float,
    Double,
}

impl BasicType {
    /// Size of one element in bytes.
    pub const fn size(self) -> usize {
        match self {
            BasicType::Byte => 1,
            BasicType::Short => 2,
            BasicType::Int | BasicType::UInt | BasicType::Float => 4,
            BasicType::Long
            | BasicType::ULong
            | BasicType::LongLong
            | BasicType::ULongLong
            | BasicType::Double => 8,
        }
    }

    pub const fn is_integer(self) -> bool {
        !matches!(self, BasicType::Float | BasicType::Double)
    }
}

/// Element type of a transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataType {
    Basic(BasicType),
    /// `count` consecutive elements of `base`.
    Contiguous { base: BasicType, count: usize },
    /// Blocks of `blocklen` elements every `stride` elements.
    Strided {
        base: BasicType,
        blocklen: usize,
        stride: usize,
    },
    /// Blocks of `blocklens[i]` elements at element offsets `displs[i]`.
    Indexed {
        base: BasicType,
        blocklens: Vec<usize>,
        displs: Vec<usize>,
    },
}

impl DataType {
    pub fn base(&self) -> BasicType {
        match self {
            DataType::Basic(base)
            | DataType::Contiguous { base, .. }
            | DataType::Strided { base, .. }
            | DataType::Indexed { base, .. } => *base,
        }
    }

    /// Number of base elements in one element of this type, for
    /// contiguous types only.
    fn contiguous_count(&self) -> Option<usize> {
        match self {
            DataType::Basic(_) => Some(1),
            DataType::Contiguous { count, .. } => Some(*count),
            DataType::Strided { .. } | DataType::Indexed { .. } => None,
        }
    }
}

impl From<BasicType> for DataType {
    fn from(base: BasicType) -> Self {
        DataType::Basic(base)
    }
}

/// How the bytes of a transfer are laid out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferKind {
    /// One contiguous block on both sides.
    Contiguous,
}

/// Resolved shape of a transfer between two datatypes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversionPlan {
    pub base: BasicType,
    /// Number of base elements.
    pub nelem: usize,
    /// Byte extent on both sides.
    pub nbytes: usize,
    pub kind: TransferKind,
}

/// Plan a transfer of `nelem` elements of `src` into `dst`.
pub fn convert(src: &DataType, dst: &DataType, nelem: usize) -> Result<ConversionPlan> {
    let (Some(src_count), Some(dst_count)) = (src.contiguous_count(), dst.contiguous_count())
    else {
        return Err(Error::invalid(
            "strided and indexed datatypes are not supported",
        ));
    };
    if src.base() != dst.base() {
        return Err(Error::invalid(format!(
            "base types differ: {:?} vs {:?}",
            src.base(),
            dst.base()
        )));
    }
    if src_count != dst_count {
        return Err(Error::invalid(format!(
            "element counts differ: {src_count} vs {dst_count}"
        )));
    }
    let base = src.base();
    let nelem = nelem
        .checked_mul(src_count)
        .ok_or_else(|| Error::invalid("element count overflows"))?;
    let nbytes = nelem
        .checked_mul(base.size())
        .ok_or_else(|| Error::invalid("transfer size overflows"))?;
    Ok(ConversionPlan {
        base,
        nelem,
        nbytes,
        kind: TransferKind::Contiguous,
    })
}

/// Plan for a single-type operation such as a collective.
pub(crate) fn plan(dtype: &DataType, nelem: usize) -> Result<ConversionPlan> {
    convert(dtype, dtype, nelem)
}

/// Rust scalars with a basic type.
///
/// # Safety
/// Implementors must be plain data without padding whose every bit
/// pattern is valid.
pub unsafe trait Primitive: Copy + Send + Sync + 'static {
    const TYPE: BasicType;
}

unsafe impl Primitive for u8 {
    const TYPE: BasicType = BasicType::Byte;
}
unsafe impl Primitive for i16 {
    const TYPE: BasicType = BasicType::Short;
}
unsafe impl Primitive for i32 {
    const TYPE: BasicType = BasicType::Int;
}
unsafe impl Primitive for u32 {
    const TYPE: BasicType = BasicType::UInt;
}
unsafe impl Primitive for i64 {
    const TYPE: BasicType = BasicType::Long;
}
unsafe impl Primitive for u64 {
    const TYPE: BasicType = BasicType::ULong;
}
unsafe impl Primitive for f32 {
    const TYPE: BasicType = BasicType::Float;
}
unsafe impl Primitive for f64 {
    const TYPE: BasicType = BasicType::Double;
}

/// View a slice of primitives as bytes.
pub fn bytes_of<T: Primitive>(values: &[T]) -> &[u8] {
    unsafe { std::slice::from_raw_parts(values.as_ptr().cast(), std::mem::size_of_val(values)) }
}

/// View a mutable slice of primitives as bytes.
pub fn bytes_of_mut<T: Primitive>(values: &mut [T]) -> &mut [u8] {
    unsafe {
        std::slice::from_raw_parts_mut(values.as_mut_ptr().cast(), std::mem::size_of_val(values))
    }
}
