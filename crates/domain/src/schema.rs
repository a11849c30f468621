use std::collections::{BTreeMap, HashMap, HashSet};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use time::Date;
use time::macros::format_description;

const MAX_TEXT_LENGTH: usize = 500;
const MIN_PHONE_DIGITS: usize = 5;
const MAX_PHONE_DIGITS: usize = 15;
const MAX_EXACT_INTEGER: f64 = 9_007_199_254_740_992.0;

const AFFIRMATIVE_TOKENS: &[&str] = &["yes", "y", "true", "1", "+", "ok", "да", "д"];
const NEGATIVE_TOKENS: &[&str] = &["no", "n", "false", "0", "нет", "н"];
const OMITTED_TOKENS: &[&str] = &["none", "no", "-", "нет"];

/// A collected, coerced field value.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum FieldValue {
    Empty,
    Boolean(bool),
    Integer(i64),
    Decimal(f64),
    Text(String),
}

impl FieldValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Integer(value) => Some(*value as f64),
            Self::Decimal(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(value) => Some(value.as_str()),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Boolean(value) => Some(*value),
            _ => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Self::Empty)
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum InputKind {
    Text,
    Choice,
    Boolean,
    Number,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChoiceOption {
    pub value: String,
    pub label: String,
    #[serde(default)]
    pub aliases: Vec<String>,
}

impl ChoiceOption {
    pub fn new(value: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            label: label.into(),
            aliases: Vec::new(),
        }
    }

    pub fn alias(mut self, alias: impl Into<String>) -> Self {
        self.aliases.push(alias.into());
        self
    }

    fn matches(&self, normalized: &str) -> bool {
        self.value.to_lowercase() == normalized
            || self.label.to_lowercase() == normalized
            || self
                .aliases
                .iter()
                .any(|alias| alias.to_lowercase() == normalized)
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
pub struct NumberRule {
    pub integer: bool,
    pub min: Option<f64>,
    pub max: Option<f64>,
}

impl NumberRule {
    fn describe(&self) -> String {
        let kind = if self.integer {
            "a whole number"
        } else {
            "a number"
        };
        match (self.min, self.max) {
            (Some(min), Some(max)) => format!("{kind} from {min} to {max}"),
            (Some(min), None) => format!("{kind} not less than {min}"),
            (None, Some(max)) => format!("{kind} not greater than {max}"),
            (None, None) => kind.to_string(),
        }
    }

    fn in_bounds(&self, value: f64) -> bool {
        !(self.min.is_some_and(|min| value < min) || self.max.is_some_and(|max| value > max))
    }

    fn coerce(&self, raw: &str) -> Option<FieldValue> {
        if self.integer {
            let value = parse_integer(raw)?;
            return self
                .in_bounds(value as f64)
                .then_some(FieldValue::Integer(value));
        }
        let value: f64 = raw.replace(',', ".").parse().ok()?;
        (value.is_finite() && self.in_bounds(value)).then_some(FieldValue::Decimal(value))
    }
}

/// Exact `i64` parse. A decimal spelling such as `3.0` or `3,0` is accepted
/// only while it is exactly representable as `f64`.
fn parse_integer(raw: &str) -> Option<i64> {
    if let Ok(value) = raw.parse::<i64>() {
        return Some(value);
    }
    if raw.chars().all(|ch| ch.is_ascii_digit() || ch == '-' || ch == '+') {
        return None;
    }
    let value: f64 = raw.replace(',', ".").parse().ok()?;
    (value.is_finite() && value.fract() == 0.0 && value.abs() <= MAX_EXACT_INTEGER)
        .then_some(value as i64)
}

/// Inclusive bounds applied to every quantity field of the work report.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
pub struct NumericBounds {
    pub min: f64,
    pub max: Option<f64>,
}

impl Default for NumericBounds {
    fn default() -> Self {
        Self { min: 0.0, max: None }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Validator {
    Text,
    Phone,
    Date,
    Number(NumberRule),
    Boolean,
    Choice(Vec<ChoiceOption>),
}

impl Validator {
    pub fn input_kind(&self) -> InputKind {
        match self {
            Self::Text | Self::Phone | Self::Date => InputKind::Text,
            Self::Number(_) => InputKind::Number,
            Self::Boolean => InputKind::Boolean,
            Self::Choice(_) => InputKind::Choice,
        }
    }

    pub fn expected(&self) -> String {
        match self {
            Self::Text => "non-empty text".to_string(),
            Self::Phone => "a phone number such as +7 900 123-45-67".to_string(),
            Self::Date => "a date as DD.MM.YYYY".to_string(),
            Self::Number(rule) => rule.describe(),
            Self::Boolean => "yes or no".to_string(),
            Self::Choice(options) => {
                let labels: Vec<&str> = options.iter().map(|option| option.label.as_str()).collect();
                format!("one of: {}", labels.join(", "))
            }
        }
    }

    fn coerce(&self, raw: &str) -> Option<FieldValue> {
        let normalized = raw.to_lowercase();
        match self {
            Self::Text => {
                (raw.chars().count() <= MAX_TEXT_LENGTH).then(|| FieldValue::Text(raw.to_string()))
            }
            Self::Phone => {
                let allowed = raw
                    .chars()
                    .all(|ch| ch.is_ascii_digit() || matches!(ch, '+' | '-' | '(' | ')' | ' '));
                let digits = raw.chars().filter(char::is_ascii_digit).count();
                (allowed && (MIN_PHONE_DIGITS..=MAX_PHONE_DIGITS).contains(&digits))
                    .then(|| FieldValue::Text(raw.to_string()))
            }
            Self::Date => {
                let format = format_description!("[day].[month].[year]");
                let unified = raw.replace(['/', '-'], ".");
                let date = Date::parse(&unified, &format).ok()?;
                date.format(&format).ok().map(FieldValue::Text)
            }
            Self::Number(rule) => rule.coerce(raw),
            Self::Boolean => {
                if AFFIRMATIVE_TOKENS.contains(&normalized.as_str()) {
                    Some(FieldValue::Boolean(true))
                } else if NEGATIVE_TOKENS.contains(&normalized.as_str()) {
                    Some(FieldValue::Boolean(false))
                } else {
                    None
                }
            }
            Self::Choice(options) => options
                .iter()
                .find(|option| option.matches(&normalized))
                .map(|option| FieldValue::Text(option.value.clone())),
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("invalid value for {field}: expected {expected}")]
pub struct ValidationError {
    pub field: String,
    pub expected: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Next {
    Field(String),
    Terminal,
}

#[derive(Clone, Debug, PartialEq)]
pub struct FieldSpec {
    pub key: String,
    pub label: String,
    pub prompt: String,
    pub validator: Validator,
    pub optional: bool,
    pub unit: Option<String>,
    pub broadcast: bool,
    pub next: Next,
}

impl FieldSpec {
    pub fn new(
        key: impl Into<String>,
        label: impl Into<String>,
        prompt: impl Into<String>,
        validator: Validator,
    ) -> Self {
        Self {
            key: key.into(),
            label: label.into(),
            prompt: prompt.into(),
            validator,
            optional: false,
            unit: None,
            broadcast: false,
            next: Next::Terminal,
        }
    }

    pub fn then(mut self, next: impl Into<String>) -> Self {
        self.next = Next::Field(next.into());
        self
    }

    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    pub fn unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = Some(unit.into());
        self
    }

    pub fn broadcast(mut self) -> Self {
        self.broadcast = true;
        self
    }

    pub fn input_kind(&self) -> InputKind {
        self.validator.input_kind()
    }

    pub fn is_terminal(&self) -> bool {
        self.next == Next::Terminal
    }

    /// Coerces raw user input into this field's value domain.
    pub fn validate(&self, raw: &str) -> Result<FieldValue, ValidationError> {
        let trimmed = raw.trim();
        if self.optional && OMITTED_TOKENS.contains(&trimmed.to_lowercase().as_str()) {
            return Ok(FieldValue::Empty);
        }
        if trimmed.is_empty() {
            return Err(self.invalid());
        }
        self.validator
            .coerce(trimmed)
            .ok_or_else(|| self.invalid())
    }

    fn invalid(&self) -> ValidationError {
        let mut expected = self.validator.expected();
        if self.optional {
            expected.push_str(" (or \"none\")");
        }
        ValidationError {
            field: self.key.clone(),
            expected,
        }
    }
}

/// A named sum over a fixed set of numeric fields, shown in summaries.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct SummaryTotal {
    pub label: String,
    pub unit: Option<String>,
    pub keys: Vec<String>,
    pub decimals: usize,
}

impl SummaryTotal {
    pub fn new(label: impl Into<String>, keys: &[&str]) -> Self {
        Self {
            label: label.into(),
            unit: None,
            keys: keys.iter().map(|key| key.to_string()).collect(),
            decimals: 0,
        }
    }

    pub fn unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = Some(unit.into());
        self
    }

    pub fn decimals(mut self, decimals: usize) -> Self {
        self.decimals = decimals;
        self
    }

    pub fn compute(&self, values: &BTreeMap<String, FieldValue>) -> f64 {
        self.keys
            .iter()
            .filter_map(|key| values.get(key).and_then(FieldValue::as_f64))
            .sum()
    }

    pub fn format(&self, values: &BTreeMap<String, FieldValue>) -> String {
        format!("{:.*}", self.decimals, self.compute(values))
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SchemaError {
    #[error("schema has no fields")]
    Empty,
    #[error("duplicate field key {0}")]
    DuplicateKey(String),
    #[error("unknown first field {0}")]
    UnknownFirst(String),
    #[error("field {from} points at unknown field {to}")]
    DanglingNext { from: String, to: String },
    #[error("schema has no terminal field")]
    NoTerminal,
    #[error("schema has more than one terminal field: {0:?}")]
    MultipleTerminals(Vec<String>),
    #[error("field chain loops back at {0}")]
    Cycle(String),
    #[error("field {0} is unreachable from the first field")]
    Unreachable(String),
}

/// Ordered, validated declaration of the report fields. Immutable after
/// construction.
#[derive(Clone, Debug)]
pub struct FieldSchema {
    fields: Vec<FieldSpec>,
    index: HashMap<String, usize>,
    summary_totals: Vec<SummaryTotal>,
    broadcast_totals: Vec<SummaryTotal>,
    display_name_field: Option<String>,
    title_field: Option<String>,
    hashtag_field: Option<String>,
}

impl FieldSchema {
    /// Builds a schema whose `next` links form one acyclic chain from
    /// `first` through every field to a single terminal.
    pub fn new(first: &str, fields: Vec<FieldSpec>) -> Result<Self, SchemaError> {
        if fields.is_empty() {
            return Err(SchemaError::Empty);
        }

        let mut index = HashMap::with_capacity(fields.len());
        for (position, field) in fields.iter().enumerate() {
            if index.insert(field.key.clone(), position).is_some() {
                return Err(SchemaError::DuplicateKey(field.key.clone()));
            }
        }

        let Some(&start) = index.get(first) else {
            return Err(SchemaError::UnknownFirst(first.to_string()));
        };

        for field in &fields {
            let Next::Field(to) = &field.next else {
                continue;
            };
            if !index.contains_key(to) {
                return Err(SchemaError::DanglingNext {
                    from: field.key.clone(),
                    to: to.clone(),
                });
            }
        }

        let terminals: Vec<String> = fields
            .iter()
            .filter(|field| field.is_terminal())
            .map(|field| field.key.clone())
            .collect();
        match terminals.len() {
            0 => return Err(SchemaError::NoTerminal),
            1 => {}
            _ => return Err(SchemaError::MultipleTerminals(terminals)),
        }

        let mut visited = HashSet::with_capacity(fields.len());
        let mut ordered = Vec::with_capacity(fields.len());
        let mut cursor = start;
        loop {
            let field = &fields[cursor];
            if !visited.insert(cursor) {
                return Err(SchemaError::Cycle(field.key.clone()));
            }
            ordered.push(cursor);
            match &field.next {
                Next::Terminal => break,
                Next::Field(to) => cursor = index[to],
            }
        }

        if let Some(unreachable) = fields
            .iter()
            .enumerate()
            .find(|(position, _)| !visited.contains(position))
        {
            return Err(SchemaError::Unreachable(unreachable.1.key.clone()));
        }

        let mut chained = Vec::with_capacity(fields.len());
        let mut slots: Vec<Option<FieldSpec>> = fields.into_iter().map(Some).collect();
        for position in ordered {
            if let Some(field) = slots[position].take() {
                chained.push(field);
            }
        }
        let index = chained
            .iter()
            .enumerate()
            .map(|(position, field)| (field.key.clone(), position))
            .collect();

        Ok(Self {
            fields: chained,
            index,
            summary_totals: Vec::new(),
            broadcast_totals: Vec::new(),
            display_name_field: None,
            title_field: None,
            hashtag_field: None,
        })
    }

    pub fn with_summary_total(mut self, total: SummaryTotal) -> Self {
        self.summary_totals.push(total);
        self
    }

    pub fn with_broadcast_total(mut self, total: SummaryTotal) -> Self {
        self.broadcast_totals.push(total);
        self
    }

    pub fn with_display_name_field(mut self, key: impl Into<String>) -> Self {
        self.display_name_field = Some(key.into());
        self
    }

    pub fn with_title_field(mut self, key: impl Into<String>) -> Self {
        self.title_field = Some(key.into());
        self
    }

    pub fn with_hashtag_field(mut self, key: impl Into<String>) -> Self {
        self.hashtag_field = Some(key.into());
        self
    }

    pub fn first(&self) -> &FieldSpec {
        &self.fields[0]
    }

    pub fn field(&self, key: &str) -> Option<&FieldSpec> {
        self.index.get(key).map(|position| &self.fields[*position])
    }

    /// Fields in the order they are asked.
    pub fn fields(&self) -> impl Iterator<Item = &FieldSpec> {
        self.fields.iter()
    }

    /// One-based position of `key` in the asking order.
    pub fn position(&self, key: &str) -> Option<usize> {
        self.index.get(key).map(|position| position + 1)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn numeric_keys(&self) -> impl Iterator<Item = &str> {
        self.fields
            .iter()
            .filter(|field| field.input_kind() == InputKind::Number)
            .map(|field| field.key.as_str())
    }

    pub fn summary_totals(&self) -> &[SummaryTotal] {
        &self.summary_totals
    }

    pub fn broadcast_totals(&self) -> &[SummaryTotal] {
        &self.broadcast_totals
    }

    pub fn display_name_field(&self) -> Option<&str> {
        self.display_name_field.as_deref()
    }

    pub fn title_field(&self) -> Option<&str> {
        self.title_field.as_deref()
    }

    pub fn hashtag_field(&self) -> Option<&str> {
        self.hashtag_field.as_deref()
    }
}

pub const CUSTOMER_SUBSCRIBER: &str = "subscriber";
pub const CUSTOMER_LEGAL_ENTITY: &str = "legal_entity";

/// The field-work report collected from installation crews.
pub fn work_report_schema(bounds: NumericBounds) -> Result<FieldSchema, SchemaError> {
    let count = Validator::Number(NumberRule {
        integer: true,
        min: Some(bounds.min),
        max: bounds.max,
    });
    let length = Validator::Number(NumberRule {
        integer: false,
        min: Some(bounds.min),
        max: bounds.max,
    });
    let customer_types = vec![
        ChoiceOption::new(CUSTOMER_SUBSCRIBER, "Subscriber")
            .alias("абонент")
            .alias("private"),
        ChoiceOption::new(CUSTOMER_LEGAL_ENTITY, "Legal entity")
            .alias("юридическое лицо")
            .alias("юр лицо")
            .alias("company"),
    ];

    let fields = vec![
        FieldSpec::new(
            "customer_type",
            "Customer",
            "Select the customer type.",
            Validator::Choice(customer_types),
        )
        .then("customer_name"),
        FieldSpec::new(
            "customer_name",
            "Name",
            "Enter the customer name.",
            Validator::Text,
        )
        .broadcast()
        .then("address"),
        FieldSpec::new("address", "Address", "Enter the site address.", Validator::Text)
            .broadcast()
            .then("phone"),
        FieldSpec::new(
            "phone",
            "Phone",
            "Enter the customer phone number.",
            Validator::Phone,
        )
        .then("employee"),
        FieldSpec::new(
            "employee",
            "Employee",
            "Enter your full name.",
            Validator::Text,
        )
        .broadcast()
        .then("date"),
        FieldSpec::new(
            "date",
            "Date",
            "Enter the date of the works (DD.MM.YYYY).",
            Validator::Date,
        )
        .broadcast()
        .then("sockets"),
        FieldSpec::new(
            "sockets",
            "Sockets",
            "How many sockets were installed?",
            count.clone(),
        )
        .unit("pcs")
        .broadcast()
        .then("vok1"),
        FieldSpec::new(
            "vok1",
            "Fibre cable VOK1",
            "How many metres of VOK1 cable were laid?",
            length.clone(),
        )
        .unit("m")
        .then("boxes"),
        FieldSpec::new(
            "boxes",
            "Cable ducts",
            "How many metres of cable duct were mounted?",
            length.clone(),
        )
        .unit("m")
        .then("corrugation"),
        FieldSpec::new(
            "corrugation",
            "Corrugated tube",
            "How many metres of corrugated tube were laid?",
            length.clone(),
        )
        .unit("m")
        .then("ko_big"),
        FieldSpec::new(
            "ko_big",
            "Large junction boxes",
            "How many large junction boxes were installed?",
            count.clone(),
        )
        .unit("pcs")
        .then("ko_small"),
        FieldSpec::new(
            "ko_small",
            "Small junction boxes",
            "How many small junction boxes were installed?",
            count.clone(),
        )
        .unit("pcs")
        .then("minimuff"),
        FieldSpec::new(
            "minimuff",
            "Mini splice closure spliced",
            "Was the mini splice closure spliced?",
            Validator::Boolean,
        )
        .then("trench"),
        FieldSpec::new(
            "trench",
            "Trench",
            "How many metres of trench were dug?",
            length,
        )
        .unit("m")
        .broadcast()
        .then("manholes"),
        FieldSpec::new(
            "manholes",
            "Manholes",
            "How many manholes were installed?",
            count,
        )
        .unit("pcs")
        .broadcast()
        .then("comment"),
        FieldSpec::new(
            "comment",
            "Comment",
            "Add a comment, or send \"none\".",
            Validator::Text,
        )
        .optional(),
    ];

    Ok(FieldSchema::new("customer_type", fields)?
        .with_summary_total(
            SummaryTotal::new("Total items", &["sockets", "ko_big", "ko_small", "manholes"])
                .unit("pcs"),
        )
        .with_summary_total(
            SummaryTotal::new("Total length", &["vok1", "boxes", "corrugation", "trench"])
                .unit("m")
                .decimals(2),
        )
        .with_broadcast_total(SummaryTotal::new("Total items", &["sockets", "manholes"]).unit("pcs"))
        .with_display_name_field("employee")
        .with_title_field("customer_name")
        .with_hashtag_field("employee"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn count_rule() -> Validator {
        Validator::Number(NumberRule {
            integer: true,
            min: Some(0.0),
            max: None,
        })
    }

    #[test]
    fn work_report_schema_is_a_single_chain() {
        let schema = work_report_schema(NumericBounds::default()).unwrap();
        assert_eq!(schema.first().key, "customer_type");
        assert_eq!(schema.len(), 16);
        assert_eq!(schema.position("comment"), Some(16));
        let terminals: Vec<_> = schema.fields().filter(|field| field.is_terminal()).collect();
        assert_eq!(terminals.len(), 1);
        assert_eq!(terminals[0].key, "comment");
    }

    #[test]
    fn fields_are_stored_in_asking_order() {
        let schema = FieldSchema::new(
            "a",
            vec![
                FieldSpec::new("c", "C", "c?", Validator::Text),
                FieldSpec::new("a", "A", "a?", Validator::Text).then("b"),
                FieldSpec::new("b", "B", "b?", Validator::Text).then("c"),
            ],
        )
        .unwrap();
        let keys: Vec<_> = schema.fields().map(|field| field.key.as_str()).collect();
        assert_eq!(keys, vec!["a", "b", "c"]);
    }

    #[test]
    fn rejects_cycles() {
        let result = FieldSchema::new(
            "a",
            vec![
                FieldSpec::new("a", "A", "a?", Validator::Text).then("b"),
                FieldSpec::new("b", "B", "b?", Validator::Text).then("a"),
                FieldSpec::new("c", "C", "c?", Validator::Text),
            ],
        );
        assert_eq!(result.unwrap_err(), SchemaError::Cycle("a".to_string()));
    }

    #[test]
    fn rejects_dangling_and_multiple_terminals() {
        let dangling = FieldSchema::new(
            "a",
            vec![FieldSpec::new("a", "A", "a?", Validator::Text).then("missing")],
        );
        assert!(matches!(dangling, Err(SchemaError::DanglingNext { .. })));

        let forked = FieldSchema::new(
            "a",
            vec![
                FieldSpec::new("a", "A", "a?", Validator::Text),
                FieldSpec::new("b", "B", "b?", Validator::Text),
            ],
        );
        assert!(matches!(forked, Err(SchemaError::MultipleTerminals(_))));
    }

    #[test]
    fn rejects_unreachable_fields() {
        let result = FieldSchema::new(
            "a",
            vec![
                FieldSpec::new("a", "A", "a?", Validator::Text),
                FieldSpec::new("b", "B", "b?", Validator::Text).then("a"),
            ],
        );
        assert_eq!(result.unwrap_err(), SchemaError::Unreachable("b".to_string()));
    }

    #[test]
    fn numbers_reject_negative_and_non_numeric_input() {
        let field = FieldSpec::new("count", "Count", "count?", count_rule());
        assert_eq!(field.validate("12").unwrap(), FieldValue::Integer(12));
        assert!(field.validate("-3").is_err());
        assert!(field.validate("twelve").is_err());
        assert!(field.validate("1.5").is_err());
        assert_eq!(field.validate("0").unwrap(), FieldValue::Integer(0));
    }

    #[test]
    fn whole_numbers_are_parsed_exactly() {
        let field = FieldSpec::new("count", "Count", "count?", count_rule());
        assert!(field.validate("99999999999999999999").is_err());
        assert!(field.validate("1e30").is_err());
        assert_eq!(
            field.validate("9007199254740993").unwrap(),
            FieldValue::Integer(9_007_199_254_740_993)
        );
        assert_eq!(field.validate("3,0").unwrap(), FieldValue::Integer(3));
    }

    #[test]
    fn lengths_accept_comma_decimals() {
        let field = FieldSpec::new(
            "trench",
            "Trench",
            "trench?",
            Validator::Number(NumberRule {
                integer: false,
                min: Some(0.0),
                max: Some(1000.0),
            }),
        );
        assert_eq!(field.validate("12,5").unwrap(), FieldValue::Decimal(12.5));
        assert!(field.validate("1000.5").is_err());
        assert!(field.validate("NaN").is_err());
    }

    #[test]
    fn booleans_use_a_closed_vocabulary() {
        let field = FieldSpec::new("ok", "Ok", "ok?", Validator::Boolean);
        assert_eq!(field.validate("Yes").unwrap(), FieldValue::Boolean(true));
        assert_eq!(field.validate("да").unwrap(), FieldValue::Boolean(true));
        assert_eq!(field.validate("нет").unwrap(), FieldValue::Boolean(false));
        assert!(field.validate("maybe").is_err());
    }

    #[test]
    fn optional_text_maps_sentinel_to_empty() {
        let field = FieldSpec::new("comment", "Comment", "comment?", Validator::Text).optional();
        assert_eq!(field.validate("none").unwrap(), FieldValue::Empty);
        assert_eq!(field.validate("Нет").unwrap(), FieldValue::Empty);
        assert_eq!(
            field.validate(" cable was short ").unwrap(),
            FieldValue::Text("cable was short".to_string())
        );
        assert!(field.validate("   ").is_err());
    }

    #[test]
    fn required_text_rejects_blank() {
        let field = FieldSpec::new("name", "Name", "name?", Validator::Text);
        let err = field.validate("  ").unwrap_err();
        assert_eq!(err.field, "name");
        assert_eq!(err.expected, "non-empty text");
    }

    #[test]
    fn choices_match_value_label_and_alias() {
        let schema = work_report_schema(NumericBounds::default()).unwrap();
        let field = schema.field("customer_type").unwrap();
        assert_eq!(field.input_kind(), InputKind::Choice);
        for raw in ["subscriber", "Subscriber", "абонент"] {
            assert_eq!(
                field.validate(raw).unwrap(),
                FieldValue::Text(CUSTOMER_SUBSCRIBER.to_string())
            );
        }
        assert!(field.validate("government").is_err());
    }

    #[test]
    fn dates_and_phones_are_checked() {
        let date = FieldSpec::new("date", "Date", "date?", Validator::Date);
        assert_eq!(
            date.validate("5/3/2024").unwrap_err().field,
            "date".to_string()
        );
        assert_eq!(
            date.validate("05/03/2024").unwrap(),
            FieldValue::Text("05.03.2024".to_string())
        );
        assert!(date.validate("31.02.2024").is_err());

        let phone = FieldSpec::new("phone", "Phone", "phone?", Validator::Phone);
        assert!(phone.validate("+7 (900) 123-45-67").is_ok());
        assert!(phone.validate("call me").is_err());
        assert!(phone.validate("123").is_err());
    }

    #[test]
    fn field_values_round_trip_through_json() {
        let values = vec![
            FieldValue::Empty,
            FieldValue::Boolean(true),
            FieldValue::Integer(3),
            FieldValue::Decimal(2.5),
            FieldValue::Text("x".to_string()),
        ];
        let json = serde_json::to_string(&values).unwrap();
        assert_eq!(json, r#"[null,true,3,2.5,"x"]"#);
        let parsed: Vec<FieldValue> = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, values);
    }

    #[test]
    fn summary_totals_sum_only_their_keys() {
        let schema = work_report_schema(NumericBounds::default()).unwrap();
        let mut values = BTreeMap::new();
        values.insert("sockets".to_string(), FieldValue::Integer(2));
        values.insert("manholes".to_string(), FieldValue::Integer(1));
        values.insert("trench".to_string(), FieldValue::Decimal(3.25));
        values.insert("vok1".to_string(), FieldValue::Decimal(10.0));
        let totals = schema.summary_totals();
        assert_eq!(totals[0].format(&values), "3");
        assert_eq!(totals[1].format(&values), "13.25");
    }
}
