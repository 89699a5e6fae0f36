//! Ledger file parsing
//!
//! A ledger file is comma-separated text. The first line is a header and is
//! skipped without validation; every following line carries
//! `index, account number, date (YYYY-MM-DD), amount`.

use bigdecimal::BigDecimal;
use chrono::NaiveDate;
use std::str::FromStr;

use crate::types::*;

/// Number of fields on every data line
pub const FIELDS_PER_RECORD: usize = 4;

const DATE_FORMAT: &str = "%Y-%m-%d";

/// Parse a complete ledger file
///
/// Stops at the first malformed line; no records are returned unless the whole
/// file is valid.
pub fn parse(raw: &[u8]) -> Result<Vec<LedgerRecord>, ParseError> {
    if raw.is_empty() {
        return Err(ParseError {
            line: 1,
            content: String::new(),
            kind: ParseErrorKind::MissingHeader,
        });
    }

    // The header is dropped as raw bytes so its quoting and encoding never
    // reach the CSV reader
    let body = match raw.iter().position(|&b| b == b'\n') {
        Some(end) => &raw[end + 1..],
        None => return Ok(Vec::new()),
    };

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(body);

    let mut records = Vec::new();
    let mut row = csv::StringRecord::new();
    loop {
        let start = reader.position().clone();
        let read = reader.read_record(&mut row);
        let content = raw_line(body, start.byte(), reader.position().byte());

        match read {
            Ok(false) => break,
            Ok(true) => {
                let line = row.position().map_or(start.line(), |p| p.line());
                records.push(parse_row(&row, file_line(line), content)?);
            }
            Err(err) => {
                let line = err.position().map_or(start.line(), |p| p.line());
                return Err(ParseError {
                    line: file_line(line),
                    content,
                    kind: ParseErrorKind::Malformed(err.to_string()),
                });
            }
        }
    }

    Ok(records)
}

/// Line number in the whole file of a line counted from the first data line
fn file_line(body_line: u64) -> u64 {
    body_line + 1
}

/// Text of the bytes a record was read from, without its line terminator
fn raw_line(body: &[u8], start: u64, end: u64) -> String {
    let len = body.len();
    let start = usize::try_from(start).map_or(len, |s| s.min(len));
    let end = usize::try_from(end).map_or(len, |e| e.clamp(start, len));
    String::from_utf8_lossy(&body[start..end])
        .trim_matches(|c| c == '\r' || c == '\n')
        .to_string()
}

fn parse_row(
    row: &csv::StringRecord,
    line: u64,
    content: String,
) -> Result<LedgerRecord, ParseError> {
    let fail = |kind| ParseError {
        line,
        content: content.clone(),
        kind,
    };

    if row.len() != FIELDS_PER_RECORD {
        return Err(fail(ParseErrorKind::FieldCount {
            expected: FIELDS_PER_RECORD,
            found: row.len(),
        }));
    }

    // Field 0 is the exporter's row index and carries no meaning here
    let account = &row[1];
    let date = &row[2];
    let amount = &row[3];

    let account_number = parse_account_number(account)
        .ok_or_else(|| fail(ParseErrorKind::InvalidAccount(account.to_string())))?;
    let date = parse_date(date).ok_or_else(|| fail(ParseErrorKind::InvalidDate(date.to_string())))?;
    let amount =
        parse_amount(amount).ok_or_else(|| fail(ParseErrorKind::InvalidAmount(amount.to_string())))?;

    Ok(LedgerRecord {
        line,
        account_number,
        date,
        amount,
    })
}

fn parse_account_number(value: &str) -> Option<AccountNumber> {
    if value.is_empty() || !value.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    value.parse().ok()
}

fn parse_date(value: &str) -> Option<NaiveDate> {
    if value.len() != 10 {
        return None;
    }
    NaiveDate::parse_from_str(value, DATE_FORMAT).ok()
}

/// Plain decimal notation only: optional `-`, digits, optional fraction
fn parse_amount(value: &str) -> Option<BigDecimal> {
    let unsigned = value.strip_prefix('-').unwrap_or(value);
    let (whole, fraction) = match unsigned.split_once('.') {
        Some((whole, fraction)) => (whole, Some(fraction)),
        None => (unsigned, None),
    };

    let all_digits = |s: &str| !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit());
    if !all_digits(whole) || !fraction.is_none_or(all_digits) {
        return None;
    }

    BigDecimal::from_str(value).ok()
}
