//! Phone number to JID normalization.

use crmlink_protocol::constants::INDIVIDUAL_SERVER;

/// Normalizes a phone number or address into a WhatsApp JID.
///
/// Anything containing `@` is assumed to be a fully-qualified JID (a group,
/// for instance) and returned unchanged. Otherwise every non-digit is
/// stripped, then leading zeros, and the individual-chat server appended.
pub fn normalize_jid(input: &str) -> String {
    if input.contains('@') {
        return input.to_string();
    }
    let digits: String = input.chars().filter(char::is_ascii_digit).collect();
    let user = digits.trim_start_matches('0');
    format!("{user}@{INDIVIDUAL_SERVER}")
}
