use tracing::warn;

use crate::types::{Location, CallCategory, CallDirection, CallStatus};

/// Canonical site for a provider location code, if the code is known.
///
/// Codes are compared after lower-casing and dropping everything that is not
/// `a-z`, so `"Ann Arbor"`, `"ann-arbor"` and `"AA"` all match.
pub fn lookup_location(raw: &str) -> Option<Location> {
    let key: String = raw
        .chars()
        .map(|c| c.to_ascii_lowercase())
        .filter(|c| c.is_ascii_lowercase())
        .collect();

    match key.as_str() {
        "aa" | "annarbor" => Some(Location::AnnArbor),
        "wixom" | "wx" => Some(Location::Wixom),
        "plymouth" | "ply" | "plym" => Some(Location::Plymouth),
        _ => None,
    }
}

/// Like [`lookup_location`] but unknown codes fall back to
/// [`Location::default`] (Ann Arbor) with a warning
pub fn resolve_location(raw: &str) -> Location {
    match lookup_location(raw) {
        Some(location) => location,
        None => {
            let fallback = Location::default();
            warn!(code = raw, fallback = %fallback, "unknown location code, using default");
            fallback
        }
    }
}

/// Map a provider call result onto a final call status
pub fn map_call_result(raw: &str) -> CallStatus {
    match raw.trim().to_ascii_lowercase().as_str() {
        "answered" | "completed" | "success" => CallStatus::Completed,
        "no_answer" | "busy" | "failed" | "timeout" => CallStatus::Missed,
        "abandoned" | "hangup" | "cancelled" => CallStatus::Abandoned,
        "transferred" | "transfer" => CallStatus::Transferred,
        "voicemail" | "vm" => CallStatus::Voicemail,
        _ => CallStatus::Completed,
    }
}

/// Outbound only when an internal extension dials an outside number
pub fn call_direction(caller: &str, called: &str, internal: &std::collections::HashSet<String>) -> CallDirection {
    if internal.contains(caller) && !internal.contains(called) {
        CallDirection::Outbound
    } else {
        CallDirection::Inbound
    }
}

pub fn infer_category(call_type: Option<&str>, queue_name: &str) -> CallCategory {
    let haystack = format!("{} {}", call_type.unwrap_or_default(), queue_name).to_ascii_lowercase();
    let has = |needle: &str| haystack.contains(needle);

    if has("appointment") || has("scheduling") {
        CallCategory::Appointment
    } else if has("prescription") || has("refill") || haystack.split_whitespace().any(|w| w == "rx") {
        CallCategory::Prescription
    } else if has("billing") || has("insurance") {
        CallCategory::Billing
    } else if has("followup") || has("follow-up") || has("follow up") {
        CallCategory::FollowUp
    } else {
        CallCategory::General
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::HashSet;

    #[test]
    fn test_location_table() {
        assert_eq!(lookup_location("wixom"), Some(Location::Wixom));
        assert_eq!(lookup_location("WX"), Some(Location::Wixom));
        assert_eq!(lookup_location("Ann Arbor"), Some(Location::AnnArbor));
        assert_eq!(lookup_location("a.a."), Some(Location::AnnArbor));
        assert_eq!(lookup_location("Plym"), Some(Location::Plymouth));
        assert_eq!(lookup_location("detroit"), None);
        assert_eq!(lookup_location(""), None);
    }

    #[test]
    fn test_unknown_location_falls_back() {
        assert_eq!(resolve_location("canton"), Location::AnnArbor);
        assert_eq!(resolve_location("ply"), Location::Plymouth);
    }

    #[test]
    fn test_call_result_mapping() {
        assert_eq!(map_call_result("Answered"), CallStatus::Completed);
        assert_eq!(map_call_result("no_answer"), CallStatus::Missed);
        assert_eq!(map_call_result("hangup"), CallStatus::Abandoned);
        assert_eq!(map_call_result("transfer"), CallStatus::Transferred);
        assert_eq!(map_call_result("VM"), CallStatus::Voicemail);
        assert_eq!(map_call_result("something-new"), CallStatus::Completed);
    }

    #[test]
    fn test_direction() {
        let internal: HashSet<String> = ["101", "102"].iter().map(|s| s.to_string()).collect();
        assert_eq!(call_direction("101", "7345550100", &internal), CallDirection::Outbound);
        assert_eq!(call_direction("7345550100", "101", &internal), CallDirection::Inbound);
        assert_eq!(call_direction("101", "102", &internal), CallDirection::Inbound);
    }

    #[test]
    fn test_category_inference() {
        assert_eq!(infer_category(Some("Scheduling"), "front desk"), CallCategory::Appointment);
        assert_eq!(infer_category(None, "Rx refills"), CallCategory::Prescription);
        assert_eq!(infer_category(None, "Insurance"), CallCategory::Billing);
        assert_eq!(infer_category(Some("follow-up"), "wixom"), CallCategory::FollowUp);
        assert_eq!(infer_category(Some("Inbound"), "wixom"), CallCategory::General);
    }

    proptest! {
        #[test]
        fn prop_location_ignores_case_and_punctuation(code in "(aa|annarbor|wixom|wx|plymouth|ply|plym)", noise in "[ ._-]{0,3}") {
            let expected = lookup_location(&code);
            prop_assert!(expected.is_some());
            let noisy = format!("{}{}", noise, code.to_uppercase());
            prop_assert_eq!(lookup_location(&noisy), expected);
        }

        #[test]
        fn prop_resolve_always_yields_a_location(raw in ".*") {
            let resolved = resolve_location(&raw);
            prop_assert!(Location::ALL.contains(&resolved));
        }
    }
}
