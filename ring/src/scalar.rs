use core::fmt::Debug;

/// A value type a matrix can store.
///
/// Every builtin numeric type plus `bool` qualifies. `Default` doubles as the
/// placeholder written to unoccupied bitmap cells.
pub trait Scalar: 'static + Copy + Send + Sync + Debug + Default + PartialEq {}

macro_rules! impl_scalar {
    ($($t:ty),* $(,)?) => {
        $(impl Scalar for $t {})*
    };
}

impl_scalar!(bool, i8, i16, i32, i64, u8, u16, u32, u64, f32, f64);
