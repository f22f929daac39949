//! Closed label sets for classification
//!
//! Three taxonomies drive the pipeline: test domain, controller subsystem and
//! test pattern. Each label carries its display name and the keyword list
//! used by rule-based scoring. Labels from any outside source go through
//! [`Label::parse`], so anything outside the closed set is dropped at entry.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Common behavior of a closed label set
pub trait Label: Copy + Eq + fmt::Debug + 'static {
    /// All variants in declaration order (scoring ties resolve to the earliest)
    const ALL: &'static [Self];

    /// Display name
    fn label(self) -> &'static str;

    /// Rule keywords, lowercase
    fn keywords(self) -> &'static [&'static str];

    /// Alternative spellings accepted by [`Label::parse`]
    fn aliases(self) -> &'static [&'static str] {
        &[]
    }

    /// Lenient lookup by display name or alias, case-insensitive
    fn parse(text: &str) -> Option<Self> {
        let needle = text.trim().to_lowercase();
        if needle.is_empty() {
            return None;
        }
        Self::ALL.iter().copied().find(|v| {
            v.label().to_lowercase() == needle
                || v.aliases().iter().any(|a| a.to_lowercase() == needle)
        })
    }

    /// Keywords of this label found in `lowered`
    fn matched_keywords(self, lowered: &str) -> Vec<&'static str> {
        self.keywords()
            .iter()
            .copied()
            .filter(|k| lowered.contains(k))
            .collect()
    }
}

macro_rules! display_label {
    ($ty:ty) => {
        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.label())
            }
        }
    };
}

/// Test domain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Domain {
    #[serde(rename = "HIL测试")]
    HilTesting,
    #[serde(rename = "实车电子电器测试")]
    VehicleElectrical,
    #[serde(rename = "能耗测试")]
    EnergyConsumption,
    #[serde(rename = "台架测试")]
    BenchTesting,
    #[serde(rename = "环境测试")]
    Environmental,
    #[serde(rename = "安全测试")]
    Safety,
}

impl Label for Domain {
    const ALL: &'static [Self] = &[
        Self::HilTesting,
        Self::VehicleElectrical,
        Self::EnergyConsumption,
        Self::BenchTesting,
        Self::Environmental,
        Self::Safety,
    ];

    fn label(self) -> &'static str {
        match self {
            Self::HilTesting => "HIL测试",
            Self::VehicleElectrical => "实车电子电器测试",
            Self::EnergyConsumption => "能耗测试",
            Self::BenchTesting => "台架测试",
            Self::Environmental => "环境测试",
            Self::Safety => "安全测试",
        }
    }

    fn keywords(self) -> &'static [&'static str] {
        match self {
            Self::HilTesting => &["hil", "硬件在环", "故障注入", "信号模拟", "实时仿真"],
            Self::VehicleElectrical => &["实车", "电子电器", "emc", "电源", "网络", "总线"],
            Self::EnergyConsumption => &["能耗", "续航", "电耗", "wltp", "cltc", "充电"],
            Self::BenchTesting => &["台架", "耐久", "nvh", "性能", "振动", "盐雾"],
            Self::Environmental => &["环境", "温度", "湿度", "振动", "防护", "ip等级"],
            Self::Safety => &["安全", "iso26262", "asil", "防护", "故障安全"],
        }
    }

    fn aliases(self) -> &'static [&'static str] {
        match self {
            Self::HilTesting => &["hil", "hil_testing"],
            Self::VehicleElectrical => &["vehicle_ee"],
            Self::EnergyConsumption => &["energy"],
            Self::BenchTesting => &["bench"],
            Self::Environmental => &["environmental"],
            Self::Safety => &["safety"],
        }
    }
}

display_label!(Domain);

/// Controller or vehicle subsystem under test
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Subsystem {
    #[serde(rename = "VCU控制器")]
    Vcu,
    #[serde(rename = "BMS控制器")]
    Bms,
    #[serde(rename = "MCU控制器")]
    Mcu,
    #[serde(rename = "ESP控制器")]
    Esp,
    #[serde(rename = "ADAS控制器")]
    Adas,
    #[serde(rename = "网关控制器")]
    Gateway,
    #[serde(rename = "电源系统")]
    PowerSupply,
    #[serde(rename = "网络系统")]
    Network,
    #[serde(rename = "传感器系统")]
    Sensor,
    #[serde(rename = "执行器系统")]
    Actuator,
}

impl Subsystem {
    /// Short name used in step text and ids ("VCU", "网关")
    #[must_use]
    pub fn short_name(self) -> &'static str {
        match self {
            Self::Vcu => "VCU",
            Self::Bms => "BMS",
            Self::Mcu => "MCU",
            Self::Esp => "ESP",
            Self::Adas => "ADAS",
            Self::Gateway => "网关",
            Self::PowerSupply => "电源",
            Self::Network => "网络",
            Self::Sensor => "传感器",
            Self::Actuator => "执行器",
        }
    }

    /// ASCII code used in test case ids
    #[must_use]
    pub fn code(self) -> &'static str {
        match self {
            Self::Vcu => "VCU",
            Self::Bms => "BMS",
            Self::Mcu => "MCU",
            Self::Esp => "ESP",
            Self::Adas => "ADAS",
            Self::Gateway => "GW",
            Self::PowerSupply => "PWR",
            Self::Network => "NET",
            Self::Sensor => "SNS",
            Self::Actuator => "ACT",
        }
    }
}

impl Label for Subsystem {
    const ALL: &'static [Self] = &[
        Self::Vcu,
        Self::Bms,
        Self::Mcu,
        Self::Esp,
        Self::Adas,
        Self::Gateway,
        Self::PowerSupply,
        Self::Network,
        Self::Sensor,
        Self::Actuator,
    ];

    fn label(self) -> &'static str {
        match self {
            Self::Vcu => "VCU控制器",
            Self::Bms => "BMS控制器",
            Self::Mcu => "MCU控制器",
            Self::Esp => "ESP控制器",
            Self::Adas => "ADAS控制器",
            Self::Gateway => "网关控制器",
            Self::PowerSupply => "电源系统",
            Self::Network => "网络系统",
            Self::Sensor => "传感器系统",
            Self::Actuator => "执行器系统",
        }
    }

    fn keywords(self) -> &'static [&'static str] {
        match self {
            Self::Vcu => &["vcu", "整车控制", "模式管理", "扭矩分配"],
            Self::Bms => &["bms", "电池管理", "soc", "均衡", "热管理"],
            Self::Mcu => &["mcu", "电机控制", "扭矩", "转速", "效率"],
            Self::Esp => &["esp", "车身稳定", "abs", "tcs", "esc"],
            Self::Adas => &["adas", "驾驶辅助", "aeb", "acc", "lka"],
            Self::Gateway => &["网关", "路由", "can", "通信", "网络"],
            Self::PowerSupply => &["电源", "电压", "电流", "配电", "保险"],
            Self::Network => &["网络", "can", "lin", "以太网", "通信"],
            Self::Sensor => &["传感器", "温度", "压力", "位置", "转速"],
            Self::Actuator => &["执行器", "电机", "电磁阀", "继电器", "泵"],
        }
    }

    fn aliases(self) -> &'static [&'static str] {
        match self {
            Self::Vcu => &["VCU"],
            Self::Bms => &["BMS"],
            Self::Mcu => &["MCU"],
            Self::Esp => &["ESP"],
            Self::Adas => &["ADAS"],
            Self::Gateway => &["网关", "gateway"],
            Self::PowerSupply => &["电源"],
            Self::Network => &["网络"],
            Self::Sensor => &["传感器"],
            Self::Actuator => &["执行器"],
        }
    }
}

display_label!(Subsystem);

/// Test pattern
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TestPattern {
    #[serde(rename = "功能测试")]
    Functional,
    #[serde(rename = "性能测试")]
    Performance,
    #[serde(rename = "安全测试")]
    Safety,
    #[serde(rename = "可靠性测试")]
    Reliability,
    #[serde(rename = "环境测试")]
    Environmental,
    #[serde(rename = "兼容性测试")]
    Compatibility,
    #[serde(rename = "故障注入测试")]
    FaultInjection,
    #[serde(rename = "边界测试")]
    Boundary,
    #[serde(rename = "诊断测试")]
    Diagnostic,
}

impl Label for TestPattern {
    const ALL: &'static [Self] = &[
        Self::Functional,
        Self::Performance,
        Self::Safety,
        Self::Reliability,
        Self::Environmental,
        Self::Compatibility,
        Self::FaultInjection,
        Self::Boundary,
        Self::Diagnostic,
    ];

    fn label(self) -> &'static str {
        match self {
            Self::Functional => "功能测试",
            Self::Performance => "性能测试",
            Self::Safety => "安全测试",
            Self::Reliability => "可靠性测试",
            Self::Environmental => "环境测试",
            Self::Compatibility => "兼容性测试",
            Self::FaultInjection => "故障注入测试",
            Self::Boundary => "边界测试",
            Self::Diagnostic => "诊断测试",
        }
    }

    fn keywords(self) -> &'static [&'static str] {
        match self {
            Self::Functional => &["功能", "正常", "基本", "操作", "切换"],
            Self::Performance => &["性能", "响应", "时间", "效率", "吞吐"],
            Self::Safety => &["安全", "故障", "保护", "防护", "失效"],
            Self::Reliability => &["可靠", "耐久", "寿命", "mtbf", "失效"],
            Self::Environmental => &["环境", "温度", "湿度", "振动", "盐雾"],
            Self::Compatibility => &["兼容", "互操作", "接口", "协议", "版本"],
            Self::FaultInjection => &["故障", "注入", "模拟", "错误", "异常"],
            Self::Boundary => &["边界", "极限", "最大", "最小", "范围"],
            Self::Diagnostic => &["诊断", "dtc", "故障码", "扫描", "读取"],
        }
    }
}

display_label!(TestPattern);
