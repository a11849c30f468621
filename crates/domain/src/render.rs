use time::Date;

use crate::ports::channels::RenderedContent;
use crate::report::{Report, ReportAggregate};
use crate::schema::{FieldSchema, FieldSpec, FieldValue, SummaryTotal, Validator};
use crate::util::format_ms_rfc3339;

pub fn escape_html(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for ch in raw.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            _ => escaped.push(ch),
        }
    }
    escaped
}

pub fn format_value(field: &FieldSpec, value: &FieldValue) -> String {
    let rendered = match value {
        FieldValue::Empty => return "-".to_string(),
        FieldValue::Boolean(true) => "yes".to_string(),
        FieldValue::Boolean(false) => "no".to_string(),
        FieldValue::Integer(value) => value.to_string(),
        FieldValue::Decimal(value) => value.to_string(),
        FieldValue::Text(value) => choice_label(field, value).unwrap_or(value).to_string(),
    };
    match &field.unit {
        Some(unit) => format!("{rendered} {unit}"),
        None => rendered,
    }
}

fn choice_label<'a>(field: &'a FieldSpec, value: &str) -> Option<&'a str> {
    match &field.validator {
        Validator::Choice(options) => options
            .iter()
            .find(|option| option.value == value)
            .map(|option| option.label.as_str()),
        _ => None,
    }
}

fn total_line(total: &SummaryTotal, report: &Report) -> String {
    let unit = total
        .unit
        .as_deref()
        .map(|unit| format!(" {unit}"))
        .unwrap_or_default();
    format!(
        "• {}: <b>{}</b>{unit}",
        escape_html(&total.label),
        total.format(&report.values)
    )
}

fn field_lines<'a>(
    schema: &'a FieldSchema,
    report: &'a Report,
    include: impl Fn(&FieldSpec) -> bool + 'a,
) -> impl Iterator<Item = String> + 'a {
    schema.fields().filter(move |field| include(*field)).filter_map(move |field| {
        let value = report.value(&field.key)?;
        if value.is_empty() {
            return None;
        }
        Some(format!(
            "<b>{}:</b> {}",
            escape_html(&field.label),
            escape_html(&format_value(field, value))
        ))
    })
}

/// Full summary sent back to the submitting user.
pub fn render_acknowledgement(schema: &FieldSchema, report: &Report) -> RenderedContent {
    let mut lines = vec![format!("<b>Report #{} saved</b>", report.id), String::new()];
    lines.extend(field_lines(schema, report, |_| true));
    if !schema.summary_totals().is_empty() {
        lines.push(String::new());
        lines.push("<b>Totals</b>".to_string());
        lines.extend(
            schema
                .summary_totals()
                .iter()
                .map(|total| total_line(total, report)),
        );
    }
    lines.push(String::new());
    lines.push("<i>The report is stored in the system.</i>".to_string());
    RenderedContent::html(lines.join("\n"))
}

/// Reduced public summary. Only fields flagged for broadcast are shown, so
/// contact details and comments stay private.
pub fn render_broadcast(schema: &FieldSchema, report: &Report) -> RenderedContent {
    let mut lines = vec!["<b>New work report</b>".to_string(), String::new()];
    lines.extend(field_lines(schema, report, |field| field.broadcast));
    if !schema.broadcast_totals().is_empty() {
        lines.extend(
            schema
                .broadcast_totals()
                .iter()
                .map(|total| total_line(total, report)),
        );
    }
    let mut tags = vec!["#report".to_string()];
    if let Some(tag) = schema
        .hashtag_field()
        .and_then(|key| report.text(key))
        .map(hashtag)
        .filter(|tag| tag.len() > 1)
    {
        tags.push(tag);
    }
    lines.push(String::new());
    lines.push(tags.join(" "));
    RenderedContent::html(lines.join("\n"))
}

fn hashtag(raw: &str) -> String {
    let words: Vec<&str> = raw.split_whitespace().collect();
    let joined: String = words
        .join("_")
        .chars()
        .filter(|ch| ch.is_alphanumeric() || *ch == '_')
        .collect();
    format!("#{joined}")
}

pub fn render_admin_mail(schema: &FieldSchema, report: &Report) -> RenderedContent {
    let author = schema
        .display_name_field()
        .and_then(|key| report.text(key))
        .unwrap_or(report.user_id.as_str());
    let mut rows = String::new();
    for field in schema.fields() {
        let value = report
            .value(&field.key)
            .map(|value| format_value(field, value))
            .unwrap_or_else(|| "-".to_string());
        rows.push_str(&format!(
            "<tr><th align=\"left\">{}</th><td>{}</td></tr>",
            escape_html(&field.label),
            escape_html(&value)
        ));
    }
    for total in schema.summary_totals() {
        rows.push_str(&format!(
            "<tr><th align=\"left\">{}</th><td>{}</td></tr>",
            escape_html(&total.label),
            total.format(&report.values)
        ));
    }
    let body = format!(
        "<h2>Work report #{id}</h2><p>Submitted by {author} at {at}</p><table>{rows}</table>",
        id = report.id,
        author = escape_html(author),
        at = format_ms_rfc3339(report.created_at_ms),
    );
    RenderedContent::html(body).with_subject(format!("Work report #{} from {author}", report.id))
}

/// One line per report, used for listing a user's history.
pub fn render_report_line(schema: &FieldSchema, report: &Report) -> String {
    let title = schema
        .title_field()
        .and_then(|key| report.text(key))
        .unwrap_or("untitled");
    let totals: Vec<String> = schema
        .summary_totals()
        .iter()
        .map(|total| {
            let unit = total.unit.as_deref().unwrap_or_default();
            format!("{} {unit}", total.format(&report.values)).trim_end().to_string()
        })
        .collect();
    let mut line = format!(
        "#{} {} ({})",
        report.id,
        escape_html(title),
        format_ms_rfc3339(report.created_at_ms)
    );
    if !totals.is_empty() {
        line.push_str(&format!(": {}", totals.join(", ")));
    }
    line
}

pub fn render_aggregate(schema: &FieldSchema, aggregate: &ReportAggregate) -> RenderedContent {
    aggregate_content(schema, "Statistics", aggregate)
}

/// Same figures as [`render_aggregate`], restricted to one day's reports.
pub fn render_daily_summary(
    schema: &FieldSchema,
    day: Date,
    aggregate: &ReportAggregate,
) -> RenderedContent {
    aggregate_content(schema, &format!("Summary for {day}"), aggregate)
}

fn aggregate_content(
    schema: &FieldSchema,
    heading: &str,
    aggregate: &ReportAggregate,
) -> RenderedContent {
    let mut lines = vec![
        format!("<b>{}</b>", escape_html(heading)),
        String::new(),
        format!("• Reports: <b>{}</b>", aggregate.total_reports),
        format!("• Users: <b>{}</b>", aggregate.unique_users),
    ];
    for field in schema.fields() {
        let Some(total) = aggregate.numeric_totals.get(&field.key) else {
            continue;
        };
        let unit = field
            .unit
            .as_deref()
            .map(|unit| format!(" {unit}"))
            .unwrap_or_default();
        lines.push(format!(
            "• {}: <b>{}</b>{unit}",
            escape_html(&field.label),
            total
        ));
    }
    let last = aggregate
        .last_activity_ms
        .map(format_ms_rfc3339)
        .unwrap_or_else(|| "no data".to_string());
    lines.push(format!("• Last activity: {last}"));
    RenderedContent::html(lines.join("\n"))
}
