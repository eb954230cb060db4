// Naming convention: aggregate series are called "<base>[<amount> <unit>]"
use super::aggregation_level::AggregationLevel;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Postfix<'a> {
    /// No bracketed postfix; the whole name is the base name.
    Untagged,
    /// A bracketed postfix that is not a valid level.
    Unparsable { base: &'a str, postfix: &'a str },
    Tagged { base: &'a str, level: AggregationLevel },
}

pub fn split_postfix(name: &str) -> Postfix<'_> {
    let trimmed = name.trim_end();
    if !trimmed.ends_with(']') {
        return Postfix::Untagged;
    }
    let Some(open) = trimmed.rfind('[') else {
        return Postfix::Untagged;
    };
    let base = trimmed[..open].trim();
    if base.is_empty() {
        return Postfix::Untagged;
    }
    let postfix = &trimmed[open..];
    match AggregationLevel::parse(postfix) {
        Some(level) => Postfix::Tagged { base, level },
        None => Postfix::Unparsable { base, postfix },
    }
}

/// Base name of a series; names without a valid postfix are their own base.
pub fn base_name_of(name: &str) -> &str {
    match split_postfix(name) {
        Postfix::Tagged { base, .. } => base,
        _ => name.trim(),
    }
}

pub fn aggregate_name(base: &str, level: &AggregationLevel) -> String {
    format!("{}{}", base, level.to_postfix())
}
