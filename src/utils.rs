//! Identifier minting and small formatting helpers

use bech32::Bech32m;
use uuid7::uuid7;

// construct a unique id then encode using bech32
pub fn new_uuid_to_bech32(hrp: &str) -> anyhow::Result<String> {
    let hrp = bech32::Hrp::parse(hrp)?;
    let encode = bech32::encode::<Bech32m>(hrp, uuid7().as_bytes())?;
    Ok(encode)
}

// The prefixes below are compile-time constants that always parse, so the
// entity constructors can mint ids without threading a Result around.
fn mint(prefix: &str) -> String {
    let hrp = bech32::Hrp::parse_unchecked(prefix);
    bech32::encode::<Bech32m>(hrp, uuid7().as_bytes())
        .expect("failed to serialise a 16 byte uuid to bech32 encoding.")
}

pub fn company_id() -> String {
    mint("comp_")
}
pub fn user_id() -> String {
    mint("usr_")
}
pub fn invoice_id() -> String {
    mint("inv_")
}
pub fn rule_id() -> String {
    mint("rule_")
}
pub fn audit_id() -> String {
    mint("audit_")
}
pub fn notification_id() -> String {
    mint("ntf_")
}
pub fn entry_id() -> String {
    mint("led_")
}
pub fn extraction_id() -> String {
    mint("xlog_")
}

/// Render an amount held in minor units as a decimal string, e.g. 123456 -> "1234.56"
pub fn format_amount(cents: u64) -> String {
    format!("{}.{:02}", cents / 100, cents % 100)
}
