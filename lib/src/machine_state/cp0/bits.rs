// SPDX-FileCopyrightText: 2025 TriliTech <contact@trili.tech>
//
// SPDX-License-Identifier: MIT

/// Declare a CP0 register as a `u64` newtype with typed fields.
///
/// Fields are listed from bit 0 upwards, each taking the `WIDTH` of its
/// [`Bits64`](crate::bits::Bits64) type. A field `NAME` gets the accessors
/// `name()`, `with_name(value)` and `set_name(value)`, and its lowest bit
/// as `NAME_OFFSET`. Decoding a raw value forces reserved
/// [`ConstantBits`](crate::bits::ConstantBits) fields to their constant.
#[macro_export]
macro_rules! cp0_register {
    {
        $( #[$meta:meta] )*
        pub struct $reg:ident {
            $( $field:ident: $ty:ty ),+ $( , )?
        }
    } => {
        $( #[$meta] )*
        #[derive(Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
        pub struct $reg(u64);

        impl $reg {
            /// Register value as read by `mfc0`
            #[inline(always)]
            pub const fn raw(self) -> u64 {
                self.0
            }
        }

        impl $crate::bits::Bits64 for $reg {
            const WIDTH: usize = 0 $( + <$ty as $crate::bits::Bits64>::WIDTH )+;

            #[inline(always)]
            fn from_bits(value: u64) -> Self {
                let source = $reg(value);
                paste::paste! {
                    $reg(0) $( .[<with_ $field:lower>](source.[<$field:lower>]()) )+
                }
            }

            #[inline(always)]
            fn to_bits(&self) -> u64 {
                self.0
            }
        }

        impl std::fmt::Debug for $reg {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                let mut fields = f.debug_struct(stringify!($reg));
                paste::paste! {
                    $( fields.field(stringify!($field), &self.[<$field:lower>]()); )+
                }
                fields.finish()
            }
        }

        $crate::cp0_register_field!($reg, 0; $( $field: $ty ),+);
    };
}

#[macro_export]
#[doc(hidden)]
macro_rules! cp0_register_field {
    ( $reg:ident, $offset:expr; ) => {};

    ( $reg:ident, $offset:expr; $field:ident: $ty:ty $( , $rest:ident: $rest_ty:ty )* ) => {
        paste::paste! {
            #[allow(dead_code, reason = "Not every field accessor is used")]
            impl $reg {
                pub const [<$field:upper _OFFSET>]: usize = $offset;

                #[inline(always)]
                pub fn [<$field:lower>](self) -> $ty {
                    let bits = $crate::bits::field::extract(
                        self.0,
                        Self::[<$field:upper _OFFSET>] as u32,
                        <$ty as $crate::bits::Bits64>::WIDTH as u32,
                    );
                    <$ty as $crate::bits::Bits64>::from_bits(bits)
                }

                #[inline(always)]
                pub fn [<with_ $field:lower>](mut self, value: $ty) -> Self {
                    self.[<set_ $field:lower>](value);
                    self
                }

                #[inline(always)]
                pub fn [<set_ $field:lower>](&mut self, value: $ty) {
                    self.0 = $crate::bits::field::insert(
                        self.0,
                        Self::[<$field:upper _OFFSET>] as u32,
                        <$ty as $crate::bits::Bits64>::WIDTH as u32,
                        $crate::bits::Bits64::to_bits(&value),
                    );
                }
            }
        }

        $crate::cp0_register_field!(
            $reg, $offset + <$ty as $crate::bits::Bits64>::WIDTH; $( $rest: $rest_ty ),*
        );
    };
}
