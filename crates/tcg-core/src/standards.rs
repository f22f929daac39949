//! Built-in standard catalog
//!
//! Each known standard carries its test requirements, the constraints it
//! implies for any test case claiming compliance, and (ISO 26262 only) the
//! per-ASIL expectations.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Requirements for one ASIL level
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AsilRequirement {
    pub level: char,
    pub fault_injection: &'static str,
    pub verification: &'static str,
}

/// A known standard
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StandardTemplate {
    /// Canonical key ("ISO 26262")
    pub key: &'static str,
    pub name: &'static str,
    pub sections: &'static [&'static str],
    pub test_requirements: &'static [&'static str],
    /// Constraints a compliant test case must satisfy
    pub implications: &'static [&'static str],
    pub asil: &'static [AsilRequirement],
}

pub static STANDARDS: &[StandardTemplate] = &[
    StandardTemplate {
        key: "ISO 26262",
        name: "道路车辆功能安全",
        sections: &["安全管理", "概念阶段", "产品开发", "生产运维"],
        test_requirements: &["故障注入测试", "安全机制验证", "安全状态转换测试", "诊断覆盖率验证"],
        implications: &[
            "必须进行故障注入测试",
            "需要验证安全机制的有效性",
            "需进行ASIL等级对应的测试",
            "需要覆盖率分析报告",
            "必须验证安全状态转换",
        ],
        asil: &[
            AsilRequirement { level: 'A', fault_injection: "推荐", verification: "基础" },
            AsilRequirement { level: 'B', fault_injection: "推荐", verification: "扩展" },
            AsilRequirement { level: 'C', fault_injection: "必需", verification: "详细" },
            AsilRequirement { level: 'D', fault_injection: "必需", verification: "全面" },
        ],
    },
    StandardTemplate {
        key: "ISO 21434",
        name: "道路车辆网络安全",
        sections: &["组织网络安全管理", "项目相关网络安全管理"],
        test_requirements: &[
            "威胁分析与风险评估",
            "安全控制措施验证",
            "漏洞扫描与渗透测试",
            "安全事件响应测试",
        ],
        implications: &[
            "必须进行威胁分析和风险评估",
            "需要验证安全控制措施",
            "需进行渗透测试",
            "需要安全测试报告",
            "必须验证安全事件响应",
        ],
        asil: &[],
    },
    StandardTemplate {
        key: "GB/T 18384",
        name: "电动汽车安全要求",
        sections: &["电气安全", "功能安全", "防护安全"],
        test_requirements: &["绝缘电阻测试", "电位均衡测试", "触电防护测试", "过流保护测试"],
        implications: &[
            "必须进行绝缘电阻测试",
            "需要验证电位均衡",
            "需进行触电防护测试",
            "需要过流保护验证",
            "必须进行防护等级测试",
        ],
        asil: &[],
    },
];

static STANDARD_REF: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(ISO|GB/T|GB)\s*(\d{3,5})").expect("valid standard reference pattern")
});

static ASIL_LEVEL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)ASIL[-\s]?([ABCD])").expect("valid ASIL pattern"));

fn squash(text: &str) -> String {
    text.chars()
        .filter(|c| !c.is_whitespace())
        .flat_map(char::to_lowercase)
        .collect()
}

/// Look up a standard by name, ignoring case and spacing
#[must_use]
pub fn find_standard(name: &str) -> Option<&'static StandardTemplate> {
    let wanted = squash(name);
    STANDARDS.iter().find(|s| squash(s.key) == wanted)
}

/// Canonical spelling: catalog key when known, otherwise trimmed input
#[must_use]
pub fn canonical_name(name: &str) -> String {
    find_standard(name).map_or_else(|| name.trim().to_string(), |s| s.key.to_string())
}

/// First catalog standard mentioned anywhere in `text`
#[must_use]
pub fn standard_mentioned_in(text: &str) -> Option<&'static str> {
    let haystack = squash(text);
    STANDARDS
        .iter()
        .find(|s| haystack.contains(&squash(s.key)))
        .map(|s| s.key)
}

/// Standards referenced in free text, canonicalized, in order of appearance
#[must_use]
pub fn detect_standards(text: &str) -> Vec<String> {
    let mut found: Vec<String> = Vec::new();
    for cap in STANDARD_REF.captures_iter(text) {
        let prefix = cap[1].to_uppercase();
        let prefix = if prefix == "GB" { "GB/T".to_string() } else { prefix };
        let name = canonical_name(&format!("{prefix} {}", &cap[2]));
        if !found.contains(&name) {
            found.push(name);
        }
    }
    found
}

/// ASIL level mentioned in text ("ASIL-C", "ASIL C", "ASILC")
#[must_use]
pub fn detect_asil(text: &str) -> Option<char> {
    ASIL_LEVEL
        .captures(text)
        .and_then(|c| c[1].chars().next())
        .map(|c| c.to_ascii_uppercase())
}

/// Resolved details for one standard in a request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StandardDetail {
    pub name: String,
    pub sections: Vec<String>,
    pub test_requirements: Vec<String>,
    pub test_implications: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub asil_level: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub asil_requirement: Option<String>,
}

impl StandardDetail {
    /// Build details from the catalog, with the ASIL level when relevant
    #[must_use]
    pub fn from_template(template: &StandardTemplate, asil: Option<char>) -> Self {
        let asil_entry = asil.and_then(|lvl| template.asil.iter().find(|a| a.level == lvl));
        Self {
            name: template.name.to_string(),
            sections: template.sections.iter().map(ToString::to_string).collect(),
            test_requirements: template
                .test_requirements
                .iter()
                .map(ToString::to_string)
                .collect(),
            test_implications: template.implications.iter().map(ToString::to_string).collect(),
            asil_level: asil_entry.map(|a| format!("ASIL {}", a.level)),
            asil_requirement: asil_entry.map(|a| {
                format!(
                    "ASIL {}等级要求: 故障注入{}，验证深度{}",
                    a.level, a.fault_injection, a.verification
                )
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_ignores_spacing_and_case() {
        assert_eq!(find_standard("iso26262").map(|s| s.key), Some("ISO 26262"));
        assert_eq!(find_standard("GB/T18384").map(|s| s.key), Some("GB/T 18384"));
        assert!(find_standard("ISO 9001").is_none());
    }

    #[test]
    fn detects_standards_in_order() {
        let found = detect_standards("符合ISO 26262及GB/T 18384，参考iso21434");
        assert_eq!(found, vec!["ISO 26262", "GB/T 18384", "ISO 21434"]);
    }

    #[test]
    fn unknown_standards_are_kept_verbatim() {
        assert_eq!(detect_standards("满足ISO 16750要求"), vec!["ISO 16750"]);
    }

    #[test]
    fn asil_spellings() {
        assert_eq!(detect_asil("ASIL-C"), Some('C'));
        assert_eq!(detect_asil("asil d 等级"), Some('D'));
        assert_eq!(detect_asil("ASILB"), Some('B'));
        assert_eq!(detect_asil("ASIL E"), None);
    }

    #[test]
    fn detail_includes_asil_requirement() {
        let tpl = find_standard("ISO 26262").unwrap();
        let detail = StandardDetail::from_template(tpl, Some('C'));
        assert_eq!(detail.asil_level.as_deref(), Some("ASIL C"));
        assert!(detail.asil_requirement.unwrap().contains("故障注入必需"));

        let other = StandardDetail::from_template(find_standard("ISO 21434").unwrap(), Some('C'));
        assert!(other.asil_level.is_none());
    }
}
