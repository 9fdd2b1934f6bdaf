//! Inspect resource quantities

use admission_lib::{
    processor::has_valid_granularity,
    resources::{CPU, MEMORY},
    Quantity,
};
use anyhow::{bail, Result};
use serde::Serialize;
use tabled::Tabled;

use crate::output::{print_error, print_table, OutputFormat};

#[derive(Debug, Tabled, Serialize)]
pub struct QuantityRow {
    #[tabled(rename = "Input")]
    pub input: String,
    #[tabled(rename = "Canonical")]
    pub canonical: String,
    #[tabled(rename = "Milli")]
    pub milli: String,
    #[tabled(rename = "Units")]
    pub units: String,
    #[tabled(rename = "CPU ok")]
    pub cpu_ok: bool,
    #[tabled(rename = "Memory ok")]
    pub memory_ok: bool,
}

impl QuantityRow {
    pub fn new(input: &str, quantity: &Quantity) -> Self {
        Self {
            input: input.to_string(),
            canonical: quantity.to_string(),
            milli: quantity.milli_value().to_string(),
            units: quantity.value().to_string(),
            cpu_ok: has_valid_granularity(CPU, quantity),
            memory_ok: has_valid_granularity(MEMORY, quantity),
        }
    }
}

/// Run the `quantity` command
pub fn run(values: &[String], format: OutputFormat) -> Result<()> {
    let mut rows = Vec::new();
    let mut failed = 0;
    for value in values {
        match value.parse::<Quantity>() {
            Ok(quantity) => rows.push(QuantityRow::new(value, &quantity)),
            Err(e) => {
                print_error(&e.to_string());
                failed += 1;
            }
        }
    }

    print_table(&rows, format, "No quantities parsed");
    if failed > 0 {
        bail!("{} of {} quantities could not be parsed", failed, values.len());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_reports_granularity() {
        let quantity: Quantity = "1500m".parse().unwrap();
        let row = QuantityRow::new("1500m", &quantity);
        assert_eq!(row.canonical, "1500m");
        assert_eq!(row.milli, "1500");
        assert_eq!(row.units, "2");
        assert!(row.cpu_ok);
        assert!(!row.memory_ok);
    }
}
