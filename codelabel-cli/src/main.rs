//! codelabel-cli — renders run artifacts for papers and terminals
//!
//! Reads the JSON files written by `codelabel-runner` and never talks to a
//! model.
//!
//! # Subcommands
//! - `table <metrics.json> [--format markdown|latex] [--title T] [--out PATH] [--precision N]`
//! - `summary <summary.json>` — human-readable run summary

use clap::{Parser, Subcommand, ValueEnum};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

const DEFAULT_PRECISION: usize = 2;
const NOT_AVAILABLE: &str = "n/a";

// ============================================================================
// CLI Definition
// ============================================================================

#[derive(Debug, Parser)]
#[command(
    name = "codelabel-cli",
    version,
    about = "Render codelabel metrics as Markdown or LaTeX tables"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Render a per-construct metrics file as a table
    Table {
        /// Path to `{prefix}_per_construct_metrics.json`
        input: PathBuf,

        #[arg(long, value_enum, default_value_t = Format::Markdown)]
        format: Format,

        /// Optional caption / heading
        #[arg(long)]
        title: Option<String>,

        /// Write to this file instead of stdout
        #[arg(long)]
        out: Option<PathBuf>,

        /// Decimal places for kappa, precision and recall
        #[arg(long, default_value_t = DEFAULT_PRECISION)]
        precision: usize,
    },

    /// Print a run summary
    Summary {
        /// Path to `{prefix}_summary.json`
        input: PathBuf,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Format {
    Markdown,
    Latex,
}

// ============================================================================
// Artifact Types
// ============================================================================

/// One construct's entry in the metrics file. Unknown fields are ignored.
#[derive(Debug, Deserialize)]
pub struct ConstructMetrics {
    pub freq: u64,
    pub kappa: Option<f64>,
    pub precision: Option<f64>,
    pub recall: Option<f64>,
    #[serde(default)]
    pub n_eval: u64,
}

#[derive(Debug, Default, Deserialize)]
pub struct Exclusions {
    pub evaluated: u64,
    pub missing_truth: u64,
    pub missing_prediction: u64,
    pub unresolved: u64,
}

#[derive(Debug, Deserialize)]
pub struct RunSummary {
    pub model: String,
    #[serde(default)]
    pub run_ids: Vec<String>,
    pub overall_kappa: Option<f64>,
    pub total_pairs: u64,
    pub predicted_pairs: u64,
    pub unresolved_pairs: u64,
    #[serde(default)]
    pub exclusions: Exclusions,
    #[serde(default)]
    pub degenerate_constructs: Vec<String>,
    #[serde(default)]
    pub constructs: Vec<String>,
    #[serde(default)]
    pub artifacts: BTreeMap<String, String>,
    #[serde(default)]
    pub prediction: Option<serde_json::Value>,
}

// ============================================================================
// Rendering
// ============================================================================

const HEADERS: [&str; 5] = ["construct", "freq", "kappa", "precision", "recall"];

fn fmt_metric(value: Option<f64>, precision: usize) -> String {
    match value {
        Some(v) if v.is_finite() => format!("{:.*}", precision, v),
        _ => NOT_AVAILABLE.to_string(),
    }
}

/// Table cells in display order; rows sorted by construct name.
pub fn table_rows(
    metrics: &BTreeMap<String, ConstructMetrics>,
    precision: usize,
) -> Vec<[String; 5]> {
    metrics
        .iter()
        .map(|(name, m)| {
            [
                name.clone(),
                m.freq.to_string(),
                fmt_metric(m.kappa, precision),
                fmt_metric(m.precision, precision),
                fmt_metric(m.recall, precision),
            ]
        })
        .collect()
}

pub fn render_markdown(rows: &[[String; 5]], title: Option<&str>) -> String {
    let mut out = String::new();
    if let Some(title) = title {
        out.push_str(&format!("**{}**\n\n", title));
    }
    out.push_str(&format!("| {} |\n", HEADERS.join(" | ")));
    out.push_str("|---|--:|--:|--:|--:|\n");
    for row in rows {
        // Pipes inside a construct name would split the cell.
        let cells: Vec<String> = row.iter().map(|c| c.replace('|', "\\|")).collect();
        out.push_str(&format!("| {} |\n", cells.join(" | ")));
    }
    out
}

/// Escape the characters LaTeX treats specially in running text.
pub fn escape_latex(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for ch in s.chars() {
        match ch {
            '&' | '%' | '$' | '#' | '_' | '{' | '}' => {
                out.push('\\');
                out.push(ch);
            }
            _ => out.push(ch),
        }
    }
    out
}

pub fn render_latex(rows: &[[String; 5]], title: Option<&str>) -> String {
    let mut out = String::new();
    out.push_str("\\begin{longtable}{lrrrr}\n");
    if let Some(title) = title {
        out.push_str(&format!("\\caption{{{}}} \\\\\n", escape_latex(title)));
    }
    out.push_str("\\toprule\n");
    out.push_str(&format!("{} \\\\\n", HEADERS.join(" & ")));
    out.push_str("\\midrule\n\\endhead\n");
    for row in rows {
        let cells: Vec<String> = row.iter().map(|c| escape_latex(c)).collect();
        out.push_str(&format!("{} \\\\\n", cells.join(" & ")));
    }
    out.push_str("\\bottomrule\n\\end{longtable}\n");
    out
}

// ============================================================================
// Commands
// ============================================================================

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> anyhow::Result<T> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("cannot read {}: {}", path.display(), e))?;
    serde_json::from_str(&text)
        .map_err(|e| anyhow::anyhow!("cannot parse {}: {}", path.display(), e))
}

fn do_table(
    input: &Path,
    format: Format,
    title: Option<&str>,
    out: Option<&Path>,
    precision: usize,
) -> anyhow::Result<()> {
    let metrics: BTreeMap<String, ConstructMetrics> = read_json(input)?;
    let rows = table_rows(&metrics, precision);

    let rendered = match format {
        Format::Markdown => render_markdown(&rows, title),
        Format::Latex => render_latex(&rows, title),
    };

    match out {
        Some(path) => {
            std::fs::write(path, &rendered)?;
            eprintln!("Saved {} ({} constructs)", path.display(), rows.len());
        }
        None => print!("{}", rendered),
    }
    Ok(())
}

pub fn format_summary(s: &RunSummary) -> String {
    let mut lines = vec![
        format!("Model:          {}", s.model),
        format!("Runs:           {}", s.run_ids.len()),
        format!("Overall kappa:  {}", fmt_metric(s.overall_kappa, 3)),
        format!(
            "Pairs:          {} total, {} predicted, {} unresolved",
            s.total_pairs, s.predicted_pairs, s.unresolved_pairs
        ),
        format!(
            "Evaluated:      {} (excluded: {} missing truth, {} missing prediction, {} unresolved)",
            s.exclusions.evaluated,
            s.exclusions.missing_truth,
            s.exclusions.missing_prediction,
            s.exclusions.unresolved
        ),
        format!("Constructs:     {}", s.constructs.len()),
    ];
    if !s.degenerate_constructs.is_empty() {
        lines.push(format!(
            "Degenerate:     {}",
            s.degenerate_constructs.join(", ")
        ));
    }
    if let Some(p) = &s.prediction {
        if p["cancelled"].as_bool() == Some(true) {
            lines.push("Last pass:      cancelled".to_string());
        }
    }
    for (name, path) in &s.artifacts {
        lines.push(format!("  {:<12} {}", name, path));
    }
    lines.join("\n") + "\n"
}

fn do_summary(input: &Path) -> anyhow::Result<()> {
    let summary: RunSummary = read_json(input)?;
    print!("{}", format_summary(&summary));
    Ok(())
}

// ============================================================================
// Main
// ============================================================================

fn main() {
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Table {
            input,
            format,
            title,
            out,
            precision,
        } => do_table(&input, format, title.as_deref(), out.as_deref(), precision),
        Commands::Summary { input } => do_summary(&input),
    };

    if let Err(e) = result {
        eprintln!("codelabel-cli: {}", e);
        std::process::exit(1);
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    const METRICS_JSON: &str = r#"{
  "Comment": {
    "freq": 12,
    "kappa": 0.81234,
    "precision": 0.9,
    "recall": 0.75,
    "n_eval": 40,
    "missing_truth": 0,
    "missing_prediction": 0,
    "unresolved": 1,
    "degenerate": []
  },
  "If & Else_Body": {
    "freq": 0,
    "kappa": null,
    "precision": null,
    "recall": null,
    "n_eval": 40,
    "missing_truth": 0,
    "missing_prediction": 0,
    "unresolved": 0,
    "degenerate": ["kappa", "precision", "recall"]
  }
}"#;

    fn metrics() -> BTreeMap<String, ConstructMetrics> {
        serde_json::from_str(METRICS_JSON).unwrap()
    }

    // ========================================================================
    // TEST 1: Rows are sorted and rounded, nulls render as n/a
    // ========================================================================
    #[test]
    fn test_table_rows_rounding_and_nulls() {
        let rows = table_rows(&metrics(), 2);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0], ["Comment", "12", "0.81", "0.90", "0.75"].map(String::from));
        assert_eq!(rows[1][0], "If & Else_Body");
        assert_eq!(rows[1][2], "n/a");
        assert_eq!(rows[1][4], "n/a");
    }

    // ========================================================================
    // TEST 2: Precision flag controls decimal places
    // ========================================================================
    #[test]
    fn test_precision_flag() {
        let rows = table_rows(&metrics(), 3);
        assert_eq!(rows[0][2], "0.812");
    }

    // ========================================================================
    // TEST 3: Markdown layout
    // ========================================================================
    #[test]
    fn test_markdown_layout() {
        let md = render_markdown(&table_rows(&metrics(), 2), Some("Construct Metrics"));
        let lines: Vec<&str> = md.lines().collect();
        assert_eq!(lines[0], "**Construct Metrics**");
        assert_eq!(lines[2], "| construct | freq | kappa | precision | recall |");
        assert_eq!(lines[4], "| Comment | 12 | 0.81 | 0.90 | 0.75 |");
        assert_eq!(lines.len(), 6);
    }

    // ========================================================================
    // TEST 4: LaTeX escapes special characters
    // ========================================================================
    #[test]
    fn test_latex_escaping() {
        assert_eq!(escape_latex("If & Else_Body"), "If \\& Else\\_Body");
        assert_eq!(escape_latex("50% {x} #1 $"), "50\\% \\{x\\} \\#1 \\$");

        let tex = render_latex(&table_rows(&metrics(), 2), Some("Agreement_by construct"));
        assert!(tex.starts_with("\\begin{longtable}{lrrrr}\n"));
        assert!(tex.contains("\\caption{Agreement\\_by construct}"));
        assert!(tex.contains("If \\& Else\\_Body & 0 & n/a & n/a & n/a \\\\"));
        assert!(tex.ends_with("\\end{longtable}\n"));
    }

    // ========================================================================
    // TEST 5: Table written to --out
    // ========================================================================
    #[test]
    fn test_table_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("metrics.json");
        let out = dir.path().join("table.md");
        std::fs::write(&input, METRICS_JSON).unwrap();

        do_table(&input, Format::Markdown, None, Some(&out), 2).unwrap();
        let written = std::fs::read_to_string(&out).unwrap();
        assert!(written.starts_with("| construct |"));
        assert!(written.contains("| If & Else_Body | 0 | n/a | n/a | n/a |"));
    }

    // ========================================================================
    // TEST 6: Summary rendering
    // ========================================================================
    #[test]
    fn test_format_summary() {
        let summary: RunSummary = serde_json::from_str(
            r#"{
                "model": "gpt-4o",
                "run_ids": ["00000000-0000-0000-0000-000000000000"],
                "overall_kappa": 0.6543,
                "total_pairs": 28,
                "predicted_pairs": 28,
                "unresolved_pairs": 2,
                "exclusions": {"evaluated": 24, "missing_truth": 2, "missing_prediction": 0, "unresolved": 2},
                "degenerate_constructs": ["Testing"],
                "id_col": "task_submit_id",
                "text_col": "code_change_text",
                "constructs": ["Operator", "Testing"],
                "artifacts": {"ledger": "run_ledger.jsonl", "metrics": "run_per_construct_metrics.json"},
                "prediction": {"cancelled": true}
            }"#,
        )
        .unwrap();

        let text = format_summary(&summary);
        assert!(text.contains("Overall kappa:  0.654"));
        assert!(text.contains("28 total, 28 predicted, 2 unresolved"));
        assert!(text.contains("Degenerate:     Testing"));
        assert!(text.contains("Last pass:      cancelled"));
        assert!(text.contains("run_ledger.jsonl"));
    }

    // ========================================================================
    // TEST 7: Unreadable input is reported with its path
    // ========================================================================
    #[test]
    fn test_missing_input_error_names_path() {
        let err = do_summary(Path::new("/nonexistent/summary.json")).unwrap_err();
        assert!(err.to_string().contains("/nonexistent/summary.json"));
    }
}
