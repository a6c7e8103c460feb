//! 探测器类型定义

use num_enum::{IntoPrimitive, TryFromPrimitive};
use std::fmt;

/// 探测器类型（帧头 `det_type` 字段）
///
/// 数值与接收端库的探测器类型编号一致。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, TryFromPrimitive, IntoPrimitive)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
#[repr(u8)]
pub enum DetectorType {
    Generic = 0,
    Eiger = 1,
    Gotthard = 2,
    Jungfrau = 3,
    ChipTestBoard = 4,
    Moench = 5,
    Mythen3 = 6,
    Gotthard2 = 7,
}

impl DetectorType {
    /// 从帧头字节转换
    pub fn from_tag(tag: u8) -> Result<Self, crate::ProtocolError> {
        Self::try_from(tag).map_err(|_| crate::ProtocolError::UnknownDetectorType(tag))
    }

    /// 是否具有多个存储单元（memory cell）
    pub fn has_storage_cells(self) -> bool {
        matches!(self, Self::Jungfrau)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Generic => "generic",
            Self::Eiger => "eiger",
            Self::Gotthard => "gotthard",
            Self::Jungfrau => "jungfrau",
            Self::ChipTestBoard => "chiptestboard",
            Self::Moench => "moench",
            Self::Mythen3 => "mythen3",
            Self::Gotthard2 => "gotthard2",
        }
    }
}

impl fmt::Display for DetectorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for DetectorType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "generic" => Ok(Self::Generic),
            "eiger" => Ok(Self::Eiger),
            "gotthard" => Ok(Self::Gotthard),
            "jungfrau" => Ok(Self::Jungfrau),
            "chiptestboard" => Ok(Self::ChipTestBoard),
            "moench" => Ok(Self::Moench),
            "mythen3" => Ok(Self::Mythen3),
            "gotthard2" => Ok(Self::Gotthard2),
            other => Err(format!("unknown detector type '{}'", other)),
        }
    }
}
