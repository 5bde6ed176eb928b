//! OCC option-symbology helpers.
//!
//! An OCC ticker looks like `O:RZLV251107C00005500`: root symbol, expiry as
//! YYMMDD, call/put flag, and the strike in thousandths padded to eight
//! digits.

use std::sync::LazyLock;

use anyhow::{bail, ensure, Result};
use regex::Regex;

static OCC_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^O:(?P<root>[A-Z]{1,6})(?P<yy>\d{2})(?P<mm>\d{2})(?P<dd>\d{2})(?P<cp>[CP])(?P<strike>\d{8})$")
        .expect("OCC ticker pattern is valid")
});

const MILLIS_PER_UNIT: f64 = 1000.0;

/// Parse an OCC-formatted option ticker and return the strike.
///
/// Example: `O:RZLV251107C00005500` -> 5.5
pub fn parse_occ_strike(ticker: &str) -> Result<f64> {
    let Some(captures) = OCC_PATTERN.captures(ticker) else {
        bail!("invalid OCC option ticker: {ticker}");
    };
    let strike_millis: i64 = captures["strike"].parse()?;
    Ok(strike_millis as f64 / MILLIS_PER_UNIT)
}

/// Build an OCC-formatted option ticker from its pieces.
///
/// `expiration_date` must be YYYY-MM-DD; `contract_type` is matched on its
/// first letter (`call`/`put`, case-insensitive).
pub fn build_occ_option_ticker(
    underlying: &str,
    expiration_date: &str,
    contract_type: &str,
    strike: f64,
) -> Result<String> {
    let exp = expiration_date.replace('-', "");
    if exp.len() != 8 || !exp.bytes().all(|b| b.is_ascii_digit()) {
        bail!("expiration_date must be in YYYY-MM-DD format");
    }
    let (yy, mm, dd) = (&exp[2..4], &exp[4..6], &exp[6..8]);

    let cp = if contract_type
        .to_ascii_lowercase()
        .starts_with('c')
    {
        'C'
    } else {
        'P'
    };

    let strike_millis = (strike * MILLIS_PER_UNIT).round() as i64;
    ensure!(
        (0..=99_999_999).contains(&strike_millis),
        "strike {strike} is out of range for OCC encoding"
    );

    Ok(format!(
        "O:{}{yy}{mm}{dd}{cp}{strike_millis:08}",
        underlying.to_uppercase()
    ))
}

/// Build OCC tickers for each of the given strikes.
pub fn build_occ_option_list(
    underlying: &str,
    expiration_date: &str,
    contract_type: &str,
    strikes: &[f64],
) -> Result<Vec<String>> {
    strikes
        .iter()
        .map(|&strike| build_occ_option_ticker(underlying, expiration_date, contract_type, strike))
        .collect()
}

/// Generate a list of strikes from the provided filters.
///
/// A fixed `strike` wins outright; otherwise the gte/lte bounds are walked
/// in `step` increments (defaults 0.5 through 10.0). Stepping is done in
/// integer thousandths so no strike drifts from decimal accumulation.
pub fn generate_strike_ladder(
    strike: Option<f64>,
    strike_gte: Option<f64>,
    strike_lte: Option<f64>,
    step: f64,
) -> Vec<f64> {
    if let Some(strike) = strike {
        return vec![strike];
    }

    let mut start = strike_gte.unwrap_or(0.5);
    let mut end = strike_lte.unwrap_or(10.0);
    if end < start {
        std::mem::swap(&mut start, &mut end);
    }
    let step = if step > 0.0 { step } else { 0.5 };

    let start_millis = (start * MILLIS_PER_UNIT).round() as i64;
    let end_millis = (end * MILLIS_PER_UNIT).round() as i64;
    let step_millis = ((step * MILLIS_PER_UNIT).round() as i64).max(1);

    (start_millis..=end_millis)
        .step_by(step_millis as usize)
        .map(|millis| millis as f64 / MILLIS_PER_UNIT)
        .collect()
}
