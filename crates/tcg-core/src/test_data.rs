//! Deterministic physical test data
//!
//! Normal values are range midpoints and boundary values come from a fixed
//! list, so generated data never depends on the inference service.

use serde_json::{json, Map, Value};

/// Physical quantity with generation rules
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Quantity {
    Voltage,
    Current,
    Temperature,
    Time,
}

impl Quantity {
    pub const ALL: &'static [Self] = &[Self::Voltage, Self::Current, Self::Temperature, Self::Time];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Voltage => "voltage",
            Self::Current => "current",
            Self::Temperature => "temperature",
            Self::Time => "time",
        }
    }

    /// Declared normal range
    #[must_use]
    pub fn normal_range(self) -> (f64, f64) {
        match self {
            Self::Voltage => (9.0, 16.0),
            Self::Current => (0.0, 100.0),
            Self::Temperature => (-40.0, 85.0),
            Self::Time => (10.0, 1000.0),
        }
    }

    #[must_use]
    pub fn boundary_values(self) -> &'static [f64] {
        match self {
            Self::Voltage => &[6.0, 9.0, 12.0, 16.0, 18.0],
            Self::Current => &[0.0, 50.0, 100.0, 150.0, 200.0],
            Self::Temperature => &[-40.0, -20.0, 0.0, 25.0, 60.0, 85.0, 105.0],
            Self::Time => &[1.0, 10.0, 100.0, 500.0, 1000.0, 5000.0],
        }
    }

    #[must_use]
    pub fn unit(self) -> &'static str {
        match self {
            Self::Voltage => "V",
            Self::Current => "A",
            Self::Temperature => "°C",
            Self::Time => "ms",
        }
    }

    /// Decimal places kept in generated values
    fn precision(self) -> i32 {
        match self {
            Self::Voltage | Self::Current => 1,
            Self::Temperature | Self::Time => 0,
        }
    }

    /// Midpoint of the normal range, rounded to the quantity's precision
    #[must_use]
    pub fn normal_value(self) -> f64 {
        let (lo, hi) = self.normal_range();
        let scale = 10f64.powi(self.precision().max(1));
        ((lo + hi) / 2.0 * scale).round() / scale
    }

    /// Boundary value for a 1-based step number, cycling through the list
    #[must_use]
    pub fn boundary_value(self, step_number: usize) -> f64 {
        let values = self.boundary_values();
        values[step_number.saturating_sub(1) % values.len()]
    }
}

/// Valid CAN identifier range
pub const CAN_ID_RANGE: (u16, u16) = (0x100, 0x7FF);
const CAN_ID_EXAMPLES: &[u16] = &[0x100, 0x200, 0x300];

/// CAN identifier for a 1-based step number, formatted `0x0100`
#[must_use]
pub fn can_id(step_number: usize) -> String {
    let id = CAN_ID_EXAMPLES[step_number.saturating_sub(1) % CAN_ID_EXAMPLES.len()];
    format!("0x{id:04X}")
}

/// Boundary-value table for a test case's `test_data`
#[must_use]
pub fn boundary_table() -> Map<String, Value> {
    Quantity::ALL
        .iter()
        .map(|q| {
            (
                q.as_str().to_string(),
                json!({
                    "values": q.boundary_values(),
                    "unit": q.unit(),
                    "normal_range": [q.normal_range().0, q.normal_range().1],
                    "description": format!("{}边界值", q.as_str()),
                }),
            )
        })
        .collect()
}

/// Signal kind named by an action
#[must_use]
pub fn infer_signal_type(action: &str) -> &'static str {
    let lowered = action.to_lowercase();
    let has = |words: &[&str]| words.iter().any(|w| lowered.contains(w));
    if has(&["can", "总线", "通信"]) {
        "CAN信号"
    } else if has(&["电压", "电源"]) {
        "电压信号"
    } else if has(&["电流"]) {
        "电流信号"
    } else if has(&["温度"]) {
        "温度信号"
    } else {
        "控制信号"
    }
}

/// Fault kind named by an action
#[must_use]
pub fn infer_fault_type(action: &str) -> &'static str {
    let lowered = action.to_lowercase();
    let has = |words: &[&str]| words.iter().any(|w| lowered.contains(w));
    if has(&["短路"]) {
        "短路故障"
    } else if has(&["开路", "断线"]) {
        "开路故障"
    } else if has(&["接地"]) {
        "接地故障"
    } else if has(&["通信", "can"]) {
        "通信故障"
    } else {
        "通用故障"
    }
}

/// Monitoring points for a verification action
#[must_use]
pub fn monitoring_points(action: &str) -> Vec<&'static str> {
    let lowered = action.to_lowercase();
    let mut points = vec!["系统状态", "错误代码", "响应时间"];
    if ["电压", "电源"].iter().any(|w| lowered.contains(w)) {
        points.extend(["电源电压", "工作电流"]);
    }
    if lowered.contains("温度") {
        points.extend(["环境温度", "芯片温度"]);
    }
    if ["can", "通信"].iter().any(|w| lowered.contains(w)) {
        points.extend(["CAN通信状态", "报文频率"]);
    }
    points
}
