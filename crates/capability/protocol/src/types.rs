//! 寄存器读取结果与数值解码

use crate::error::ProtocolError;
use domain::RegisterDataType;

/// 一次寄存器读取的协议层结果。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegisterRead {
    /// 正常响应
    Registers(Vec<u16>),
    /// 从站返回异常响应
    Exception(String),
}

/// 解析寄存器数据为浮点值（高字在前）
pub fn decode_registers(
    registers: &[u16],
    data_type: RegisterDataType,
) -> Result<f64, ProtocolError> {
    let needed = data_type.register_count() as usize;
    if registers.len() < needed {
        return Err(ProtocolError::DataParse(format!(
            "need {} registers for {:?}, got {}",
            needed,
            data_type,
            registers.len()
        )));
    }

    let value = match data_type {
        RegisterDataType::Int16 => registers[0] as i16 as f64,
        RegisterDataType::Uint16 => registers[0] as f64,
        RegisterDataType::Int32 => join_u32(registers) as i32 as f64,
        RegisterDataType::Uint32 => join_u32(registers) as f64,
        RegisterDataType::Float32 => f32::from_bits(join_u32(registers)) as f64,
        RegisterDataType::Float64 => {
            let bits = registers[..4]
                .iter()
                .fold(0u64, |acc, word| (acc << 16) | *word as u64);
            f64::from_bits(bits)
        }
    };

    if !value.is_finite() {
        return Err(ProtocolError::DataParse(format!(
            "non-finite {:?} value",
            data_type
        )));
    }
    Ok(value)
}

fn join_u32(registers: &[u16]) -> u32 {
    ((registers[0] as u32) << 16) | registers[1] as u32
}

/// 应用缩放和偏移
pub fn apply_scaling(raw: f64, scale: Option<f64>, offset: Option<f64>) -> f64 {
    raw * scale.unwrap_or(1.0) + offset.unwrap_or(0.0)
}
