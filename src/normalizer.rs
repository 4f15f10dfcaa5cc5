//! Maps free-text product types and departments onto the fixed LOB taxonomy.

pub const OTHER: &str = "Other";

/// Ordered rules: the first rule with a matching needle wins.
const RULES: [(&[&str], &str); 5] = [
    (&["thermal"], "Thermal"),
    (&["saskpower", "power"], "Power"),
    (&["channel"], "Channel"),
    (&["service"], "Service"),
    (&["batts", "caps", "batt"], "Batts & Caps"),
];

/// All taxonomy labels in rule order, excluding "Other".
pub fn taxonomy() -> impl Iterator<Item = &'static str> {
    RULES.iter().map(|(_, label)| *label)
}

fn classify(raw: &str) -> Option<&'static str> {
    let lowered = raw.to_lowercase();
    RULES
        .iter()
        .find(|(needles, _)| needles.iter().any(|n| lowered.contains(n)))
        .map(|(_, label)| *label)
}

/// Product context: unknown types keep their (trimmed) original text.
pub fn normalize_product_type(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return OTHER.to_string();
    }
    classify(trimmed)
        .map(str::to_string)
        .unwrap_or_else(|| trimmed.to_string())
}

/// Department/LOB context: unknown departments collapse into "Other".
pub fn normalize_department(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return OTHER.to_string();
    }
    classify(trimmed).unwrap_or(OTHER).to_string()
}
