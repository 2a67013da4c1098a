//! Document export
//!
//! Exports are built from in-memory state only. Each format is an
//! [`Exporter`]; [`exporter_for`] maps a [`ExportFormat`] to its implementation.

use crate::error::ExportError;
use std::fmt::Write as _;
use std::str::FromStr;
use tm_model::{Threat, ThreatModel};

/// Supported export formats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExportFormat {
    /// Pretty-printed JSON of the full model
    Json,
    /// Human-readable report
    Markdown,
}

impl ExportFormat {
    /// File extension without the dot
    #[inline]
    #[must_use]
    pub fn extension(self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::Markdown => "md",
        }
    }
}

impl FromStr for ExportFormat {
    type Err = ExportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "markdown" | "md" => Ok(Self::Markdown),
            other => Err(ExportError::UnsupportedFormat(other.to_string())),
        }
    }
}

/// Renders a threat model into a document
pub trait Exporter {
    /// Format produced
    fn format(&self) -> ExportFormat;

    /// Render the document
    ///
    /// # Errors
    /// [`ExportError`] if the model cannot be rendered.
    fn export(&self, model: &ThreatModel) -> Result<String, ExportError>;
}

/// JSON exporter
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonExporter;

impl Exporter for JsonExporter {
    fn format(&self) -> ExportFormat {
        ExportFormat::Json
    }

    fn export(&self, model: &ThreatModel) -> Result<String, ExportError> {
        Ok(serde_json::to_string_pretty(model)?)
    }
}

/// Markdown exporter
#[derive(Debug, Clone, Copy, Default)]
pub struct MarkdownExporter;

impl MarkdownExporter {
    fn cell(value: &str) -> String {
        value.replace('|', "\\|").replace('\n', " ")
    }

    fn write_threat(out: &mut String, threat: &Threat) {
        let _ = writeln!(out, "### {}\n", threat.name);
        if !threat.description.is_empty() {
            let _ = writeln!(out, "{}\n", threat.description);
        }
        if let Some(impact) = &threat.impact {
            let _ = writeln!(out, "**Impact:** {impact}\n");
        }
        if let Some(vector) = &threat.vector {
            let _ = writeln!(out, "**Vector:** {vector}\n");
        }
        for (heading, items) in [
            ("Prerequisites", &threat.prerequisites),
            ("Mitigations", &threat.mitigations),
        ] {
            if items.is_empty() {
                continue;
            }
            let _ = writeln!(out, "**{heading}:**\n");
            for item in items {
                let _ = writeln!(out, "- {item}");
            }
            out.push('\n');
        }
        if let Some(notes) = &threat.notes {
            let _ = writeln!(out, "> {notes}\n");
        }
    }
}

impl Exporter for MarkdownExporter {
    fn format(&self) -> ExportFormat {
        ExportFormat::Markdown
    }

    fn export(&self, model: &ThreatModel) -> Result<String, ExportError> {
        let mut out = String::new();
        let title = if model.title.trim().is_empty() {
            model.id.as_str()
        } else {
            model.title.as_str()
        };
        let _ = writeln!(out, "# {title}\n");

        if !model.description.is_empty() {
            let _ = writeln!(out, "## Description\n\n{}\n", model.description);
        }

        if !model.assumptions.is_empty() {
            out.push_str("## Assumptions\n\n");
            for assumption in &model.assumptions {
                let _ = writeln!(out, "- {assumption}");
            }
            out.push('\n');
        }

        let _ = writeln!(out, "## Threats ({})\n", model.threats.len());
        if model.threats.is_empty() {
            out.push_str("No threats identified.\n");
            return Ok(out);
        }

        out.push_str("| Name | Category | Likelihood | Target | Source |\n");
        out.push_str("|------|----------|------------|--------|--------|\n");
        for threat in &model.threats {
            let _ = writeln!(
                out,
                "| {} | {} | {} | {} | {} |",
                Self::cell(&threat.name),
                Self::cell(crate::aggregate::category_label(threat)),
                Self::cell(crate::aggregate::likelihood_label(threat)),
                Self::cell(threat.target_label()),
                Self::cell(threat.source_label()),
            );
        }
        out.push('\n');

        for threat in &model.threats {
            Self::write_threat(&mut out, threat);
        }
        Ok(out)
    }
}

/// Exporter for a format
#[must_use]
pub fn exporter_for(format: ExportFormat) -> Box<dyn Exporter> {
    match format {
        ExportFormat::Json => Box::new(JsonExporter),
        ExportFormat::Markdown => Box::new(MarkdownExporter),
    }
}

/// Render a model in the given format
///
/// # Errors
/// [`ExportError`] if rendering fails.
pub fn export(model: &ThreatModel, format: ExportFormat) -> Result<String, ExportError> {
    exporter_for(format).export(model)
}

/// Suggested download name, e.g. `payment-api.md`
#[must_use]
pub fn file_name(model: &ThreatModel, format: ExportFormat) -> String {
    let base = if model.title.trim().is_empty() {
        model.id.as_str()
    } else {
        model.title.as_str()
    };
    let mut slug = String::with_capacity(base.len());
    for c in base.chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
        } else if !slug.ends_with('-') && !slug.is_empty() {
            slug.push('-');
        }
    }
    let slug = slug.trim_end_matches('-');
    let slug = if slug.is_empty() { "threat-model" } else { slug };
    format!("{slug}.{}", format.extension())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn model() -> ThreatModel {
        let mut threat = Threat::new("SQL injection")
            .with_category("Tampering")
            .with_likelihood("High")
            .with_target("Orders DB")
            .with_description("Unsanitised filter parameter");
        threat.mitigations = vec!["Parameterised queries".to_string()];
        let mut model = ThreatModel::new("tm-7", "v3")
            .with_title("Payment API")
            .with_threats(vec![threat, Threat::new("Pipe | name")]);
        model.assumptions = vec!["TLS everywhere".to_string()];
        model
    }

    #[test]
    fn format_parsing() {
        assert_eq!("JSON".parse::<ExportFormat>().unwrap(), ExportFormat::Json);
        assert_eq!("md".parse::<ExportFormat>().unwrap(), ExportFormat::Markdown);
        assert!(matches!(
            "docx".parse::<ExportFormat>(),
            Err(ExportError::UnsupportedFormat(f)) if f == "docx"
        ));
    }

    #[test]
    fn json_export_round_trips() {
        let model = model();
        let text = export(&model, ExportFormat::Json).unwrap();
        let back: ThreatModel = serde_json::from_str(&text).unwrap();
        assert_eq!(back, model);
    }

    #[test]
    fn markdown_contains_sections() {
        let text = export(&model(), ExportFormat::Markdown).unwrap();

        assert!(text.starts_with("# Payment API\n"));
        assert!(text.contains("## Assumptions\n\n- TLS everywhere"));
        assert!(text.contains("## Threats (2)"));
        assert!(text.contains("| SQL injection | Tampering | High | Orders DB | Unknown Source |"));
        assert!(text.contains("| Pipe \\| name | Uncategorized | Not Assessed |"));
        assert!(text.contains("**Mitigations:**\n\n- Parameterised queries"));
    }

    #[test]
    fn markdown_for_empty_catalog() {
        let text = export(&ThreatModel::new("tm-1", "v1"), ExportFormat::Markdown).unwrap();
        assert!(text.starts_with("# tm-1\n"));
        assert!(text.contains("No threats identified."));
    }

    #[test]
    fn download_name() {
        assert_eq!(file_name(&model(), ExportFormat::Markdown), "payment-api.md");
        let untitled = ThreatModel::new("!!", "v1");
        assert_eq!(file_name(&untitled, ExportFormat::Json), "threat-model.json");
    }
}
