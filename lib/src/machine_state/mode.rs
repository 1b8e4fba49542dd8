// SPDX-FileCopyrightText: 2025 TriliTech <contact@trili.tech>
//
// SPDX-License-Identifier: MIT

/// Modes the processor can be in when addressing memory
#[derive(
    Debug,
    PartialEq,
    PartialOrd,
    Eq,
    Copy,
    Clone,
    strum::EnumIter,
    strum::Display,
    serde::Serialize,
    serde::Deserialize,
)]
#[repr(u8)]
pub enum ExecutionMode {
    User = 0b00,
    Supervisor = 0b01,
    Kernel = 0b10,
    /// Kernel mode entered through `Status.ERL`. Segments with `EU` set are
    /// unmapped in this mode.
    ErrorLevel = 0b11,
}

impl ExecutionMode {
    /// Kernel privileges, including error level.
    #[inline]
    pub fn is_kernel(self) -> bool {
        matches!(self, Self::Kernel | Self::ErrorLevel)
    }
}

impl From<u8> for ExecutionMode {
    #[inline]
    fn from(value: u8) -> Self {
        match value {
            0 => ExecutionMode::User,
            1 => ExecutionMode::Supervisor,
            3 => ExecutionMode::ErrorLevel,
            _ => ExecutionMode::Kernel,
        }
    }
}

impl From<ExecutionMode> for u8 {
    #[inline]
    fn from(value: ExecutionMode) -> Self {
        value as u8
    }
}

#[cfg(test)]
mod tests {
    use super::ExecutionMode;
    use strum::IntoEnumIterator;

    #[test]
    fn mode_u8_round_trip() {
        ExecutionMode::iter().for_each(|mode| {
            assert_eq!(ExecutionMode::from(u8::from(mode)), mode);
        });

        assert_eq!(ExecutionMode::from(42), ExecutionMode::Kernel);
    }

    #[test]
    fn kernel_privileges() {
        assert!(ExecutionMode::Kernel.is_kernel());
        assert!(ExecutionMode::ErrorLevel.is_kernel());
        assert!(!ExecutionMode::Supervisor.is_kernel());
        assert!(!ExecutionMode::User.is_kernel());
    }
}
