use anyhow::Result;
use std::io::Write;

use crate::application::LedgerService;
use crate::domain::{AccountId, Principal, Statement, format_cents};

/// Output formats for rendered statements
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Csv,
    Json,
}

impl ExportFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExportFormat::Csv => "csv",
            ExportFormat::Json => "json",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "csv" => Some(ExportFormat::Csv),
            "json" => Some(ExportFormat::Json),
            _ => None,
        }
    }
}

impl std::fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Exporter for rendering ledger data on behalf of a caller
pub struct Exporter<'a> {
    service: &'a LedgerService,
}

impl<'a> Exporter<'a> {
    pub fn new(service: &'a LedgerService) -> Self {
        Self { service }
    }

    /// Render an account statement. Returns the number of transaction lines.
    pub async fn export_statement<W: Write>(
        &self,
        principal: &Principal,
        account_id: AccountId,
        format: ExportFormat,
        writer: W,
    ) -> Result<usize> {
        let statement = self.service.statement(principal, account_id).await?;
        match format {
            ExportFormat::Csv => write_statement_csv(&statement, writer),
            ExportFormat::Json => {
                write_statement_json(&statement, writer)?;
                Ok(statement.transactions.len())
            }
        }
    }

    /// Export the bank-wide transaction log (admin only) to CSV.
    pub async fn export_transactions_csv<W: Write>(
        &self,
        principal: &Principal,
        limit: Option<usize>,
        writer: W,
    ) -> Result<usize> {
        let transactions = self.service.all_transactions(principal, limit).await?;
        let mut csv_writer = csv::Writer::from_writer(writer);

        csv_writer.write_record([
            "id",
            "sequence",
            "timestamp",
            "type",
            "from_account",
            "to_account",
            "amount",
            "description",
        ])?;

        let mut count = 0;
        for view in &transactions {
            let tx = &view.transaction;
            csv_writer.write_record([
                tx.id.to_string(),
                tx.sequence.to_string(),
                tx.timestamp.to_rfc3339(),
                tx.transaction_type.to_string(),
                view.from_number.clone().unwrap_or_default(),
                view.to_number.clone().unwrap_or_default(),
                format_cents(tx.amount_cents),
                tx.description.clone(),
            ])?;
            count += 1;
        }

        csv_writer.flush()?;
        Ok(count)
    }
}

/// Write a statement as CSV, one row per transaction.
/// `direction` is `in` or `out` relative to the statement's account.
pub fn write_statement_csv<W: Write>(statement: &Statement, writer: W) -> Result<usize> {
    let mut csv_writer = csv::Writer::from_writer(writer);

    csv_writer.write_record([
        "timestamp",
        "type",
        "from_account",
        "to_account",
        "direction",
        "amount",
        "description",
    ])?;

    let own = statement.account.number.as_str();
    let mut count = 0;
    for line in &statement.transactions {
        let direction = if line.to_number.as_deref() == Some(own) {
            "in"
        } else {
            "out"
        };
        csv_writer.write_record([
            line.timestamp.to_rfc3339(),
            line.transaction_type.to_string(),
            line.from_number.clone().unwrap_or_default(),
            line.to_number.clone().unwrap_or_default(),
            direction.to_string(),
            format_cents(line.amount),
            line.description.clone(),
        ])?;
        count += 1;
    }

    csv_writer.flush()?;
    Ok(count)
}

/// Write a statement as pretty-printed JSON.
pub fn write_statement_json<W: Write>(statement: &Statement, writer: W) -> Result<()> {
    serde_json::to_writer_pretty(writer, statement)?;
    Ok(())
}
