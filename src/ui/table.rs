use crate::backend::ContainerInfo;
use crate::migration::EncodingCounts;
use crate::ui::human_bytes;
use tabled::{settings::Style, Table, Tabled};

#[derive(Tabled)]
pub struct MetricRow {
    #[tabled(rename = "Metric")]
    pub metric: String,
    #[tabled(rename = "Value")]
    pub value: String,
}

#[derive(Tabled)]
pub struct ContainerRow {
    #[tabled(rename = "Container")]
    pub name: String,
    #[tabled(rename = "Rows")]
    pub rows: usize,
    #[tabled(rename = "Raw size")]
    pub raw_size: String,
}

impl From<&ContainerInfo> for ContainerRow {
    fn from(info: &ContainerInfo) -> Self {
        Self {
            name: info.name.clone(),
            rows: info.rows,
            raw_size: info.raw_bytes.map(human_bytes).unwrap_or_else(|| "-".to_string()),
        }
    }
}

#[derive(Tabled)]
pub struct EncodingRow {
    #[tabled(rename = "Type")]
    pub obj_type: String,
    #[tabled(rename = "Raw")]
    pub raw: usize,
    #[tabled(rename = "Structured")]
    pub structured: usize,
    #[tabled(rename = "Status")]
    pub status: &'static str,
}

impl From<&EncodingCounts> for EncodingRow {
    fn from(counts: &EncodingCounts) -> Self {
        Self {
            obj_type: counts.obj_type.class_name().to_string(),
            raw: counts.raw,
            structured: counts.structured,
            status: if counts.is_consistent() { "ok" } else { "MISMATCH" },
        }
    }
}

pub fn render<T: Tabled>(rows: &[T]) -> String {
    if rows.is_empty() {
        return String::new();
    }
    Table::new(rows).with(Style::rounded()).to_string()
}

pub struct TableBuilder {
    rows: Vec<MetricRow>,
}

impl TableBuilder {
    pub fn new() -> Self {
        Self { rows: Vec::new() }
    }

    pub fn add_row(&mut self, label: &str, value: impl ToString) -> &mut Self {
        self.rows.push(MetricRow {
            metric: label.to_string(),
            value: value.to_string(),
        });
        self
    }

    pub fn build(&self) -> String {
        render(&self.rows)
    }
}

impl Default for TableBuilder {
    fn default() -> Self {
        Self::new()
    }
}
