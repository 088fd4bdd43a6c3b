use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::message::HubMessage;
use crate::error::{Result, TelemetryError};
use crate::types::{Location, Severity};

/// Caller role as asserted by the fronting gateway
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Staff,
    Supervisor,
    Manager,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Staff => "staff",
            Role::Supervisor => "supervisor",
            Role::Manager => "manager",
            Role::Admin => "admin",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "staff" => Some(Role::Staff),
            "supervisor" => Some(Role::Supervisor),
            "manager" => Some(Role::Manager),
            "admin" => Some(Role::Admin),
            _ => None,
        }
    }

    /// Supervisors and above may trigger operational actions
    pub fn can_operate(&self) -> bool {
        *self >= Role::Supervisor
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a subscriber receives
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct SubscriptionScope {
    /// `None` means every location
    pub locations: Option<HashSet<Location>>,
    /// Messages below this severity are filtered out
    pub min_severity: Severity,
}

impl SubscriptionScope {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn for_locations(locations: impl IntoIterator<Item = Location>) -> Self {
        Self {
            locations: Some(locations.into_iter().collect()),
            min_severity: Severity::Info,
        }
    }

    pub fn with_min_severity(mut self, severity: Severity) -> Self {
        self.min_severity = severity;
        self
    }

    /// Build the scope a role is allowed to see
    ///
    /// Staff are limited to their assigned locations and cannot widen them;
    /// a staff member with no assignment is rejected. Other roles see all
    /// locations unless they ask for fewer.
    pub fn for_role(
        role: Role,
        assigned: &[Location],
        requested: Option<&[Location]>,
        min_severity: Severity,
    ) -> Result<Self> {
        let locations = match role {
            Role::Staff => {
                if assigned.is_empty() {
                    return Err(TelemetryError::forbidden(
                        "staff subscriptions require at least one assigned location",
                    ));
                }
                let assigned: HashSet<Location> = assigned.iter().copied().collect();
                let narrowed = match requested {
                    Some(requested) if !requested.is_empty() => requested
                        .iter()
                        .copied()
                        .filter(|l| assigned.contains(l))
                        .collect(),
                    _ => assigned,
                };
                if narrowed.is_empty() {
                    return Err(TelemetryError::forbidden(
                        "requested locations are outside the staff assignment",
                    ));
                }
                Some(narrowed)
            }
            _ => match requested {
                Some(requested) if !requested.is_empty() => Some(requested.iter().copied().collect()),
                _ => None,
            },
        };

        Ok(Self {
            locations,
            min_severity,
        })
    }

    pub fn covers(&self, location: Location) -> bool {
        self.locations.as_ref().map_or(true, |set| set.contains(&location))
    }

    /// Whether a message passes both the location and the severity filter
    pub fn admits(&self, message: &HubMessage) -> bool {
        if message.severity() < self.min_severity {
            return false;
        }
        match message.location() {
            Some(location) => self.covers(location),
            None => true,
        }
    }

    /// Narrow a multi-location snapshot down to what the scope covers
    pub fn filter_metrics<T, F>(&self, items: Vec<T>, location_of: F) -> Vec<T>
    where
        F: Fn(&T) -> Location,
    {
        items.into_iter().filter(|item| self.covers(location_of(item))).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::LocationMetrics;

    #[test]
    fn test_role_parsing_and_ordering() {
        assert_eq!(Role::from_str(" Supervisor "), Some(Role::Supervisor));
        assert_eq!(Role::from_str("janitor"), None);
        assert!(!Role::Staff.can_operate());
        assert!(Role::Supervisor.can_operate());
        assert!(Role::Admin.can_operate());
    }

    #[test]
    fn test_staff_cannot_widen() {
        let scope = SubscriptionScope::for_role(
            Role::Staff,
            &[Location::Wixom],
            Some(&[Location::Wixom, Location::Plymouth]),
            Severity::Info,
        )
        .unwrap();
        assert!(scope.covers(Location::Wixom));
        assert!(!scope.covers(Location::Plymouth));

        let err = SubscriptionScope::for_role(Role::Staff, &[], None, Severity::Info).unwrap_err();
        assert_eq!(err.error_code(), "FORBIDDEN");

        let err = SubscriptionScope::for_role(
            Role::Staff,
            &[Location::Wixom],
            Some(&[Location::AnnArbor]),
            Severity::Info,
        )
        .unwrap_err();
        assert_eq!(err.error_code(), "FORBIDDEN");
    }

    #[test]
    fn test_manager_sees_everything_unless_narrowed() {
        let scope = SubscriptionScope::for_role(Role::Manager, &[], None, Severity::Info).unwrap();
        assert!(Location::ALL.iter().all(|l| scope.covers(*l)));

        let narrowed =
            SubscriptionScope::for_role(Role::Manager, &[], Some(&[Location::AnnArbor]), Severity::Info)
                .unwrap();
        assert!(narrowed.covers(Location::AnnArbor));
        assert!(!narrowed.covers(Location::Wixom));
    }

    #[test]
    fn test_severity_filter() {
        let scope = SubscriptionScope::all().with_min_severity(Severity::Warning);
        let update = HubMessage::metrics_update(LocationMetrics::empty(Location::Wixom));
        assert!(!scope.admits(&update));
        assert!(SubscriptionScope::all().admits(&update));
    }
}
