//! Register definitions for the guest CPU.

#![warn(clippy::all, clippy::pedantic)]

use strum::{EnumCount, EnumIter, FromRepr, VariantNames};

// Note that these macros must be defined before their first use:
// https://doc.rust-lang.org/reference/macros-by-example.html#textual-scope
macro_rules! impl_from_and_try_from {
    ($ty:ident, $($num:ident),+) => {
        $(
            impl TryFrom<$num> for $ty {
                type Error = String;

                fn try_from(v: $num) -> Result<Self, Self::Error> {
                    Self::from_repr(v as _).ok_or_else(|| format!("invalid register index: {v}"))
                }
            }

            impl From<$ty> for $num {
                fn from(v: $ty) -> Self {
                    v.to_repr() as _
                }
            }
        )+
    };
}

macro_rules! impl_reg {
    ($ty:ident) => {
        impl $ty {
            /// The index this register has in the register file.
            #[must_use]
            pub const fn to_repr(self) -> usize {
                self as usize
            }

            /// The name of this register.
            #[must_use]
            pub const fn name(self) -> &'static str {
                Self::name_from_index(self.to_repr())
            }

            /// Returns the name of the register at the given index, or panics if the index is out of bounds.
            #[must_use]
            pub const fn name_from_index(index: usize) -> &'static str {
                <Self as VariantNames>::VARIANTS[index]
            }

            /// The total number of registers.
            #[must_use]
            pub const fn count() -> usize {
                <Self as EnumCount>::COUNT
            }

            /// Returns an iterator over all registers.
            pub fn iter() -> impl Iterator<Item = Self> {
                <Self as strum::IntoEnumIterator>::iter()
            }
        }

        impl ::std::fmt::Display for $ty {
            fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
                f.write_str(self.name())
            }
        }

        impl_from_and_try_from!($ty, u8, u16, u32, i32, usize);
    };
}

/// A general purpose register, also known as a `gpr`.
#[derive(EnumCount, EnumIter, VariantNames, FromRepr, Debug, PartialEq, Eq, Clone, Copy, Hash)]
#[strum(serialize_all = "snake_case")]
#[repr(u8)]
pub enum GeneralPurpose {
    Zero,
    At,
    V0,
    V1,
    A0,
    A1,
    A2,
    A3,
    T0,
    T1,
    T2,
    T3,
    T4,
    T5,
    T6,
    T7,
    S0,
    S1,
    S2,
    S3,
    S4,
    S5,
    S6,
    S7,
    T8,
    T9,
    K0,
    K1,
    Gp,
    Sp,
    S8,
    Ra,
}

impl_reg!(GeneralPurpose);

/// Registers that are not directly addressable by instruction operands.
#[derive(EnumCount, EnumIter, VariantNames, FromRepr, Debug, PartialEq, Eq, Clone, Copy, Hash)]
#[strum(serialize_all = "snake_case")]
#[repr(u8)]
pub enum Special {
    /// Upper word of the `mult`/`div` result.
    Hi,
    /// Lower word of the `mult`/`div` result.
    Lo,
    /// The program counter, only written at block boundaries by generated code.
    Pc,
}

impl_reg!(Special);
