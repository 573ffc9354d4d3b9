//! Typed ID definitions for the cluster manager.
//!
//! Each ID type has a unique prefix identifying the resource type.
//! IDs are ULID-based for sortability and uniqueness.

use crate::define_id;

// =============================================================================
// Cluster Membership
// =============================================================================

define_id!(AgentId, "agent");
define_id!(FrameworkId, "fw");

// =============================================================================
// Offer Lifecycle
// =============================================================================

// FilterId is the identity token carried by filter expiry timers. Timers
// hold the token, never the filter record, so a timer firing after its
// filter was detached finds no matching identity and becomes a no-op.
define_id!(FilterId, "flt");

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_agent_id_roundtrip() {
        let id = AgentId::new();
        let s = id.to_string();
        let parsed: AgentId = s.parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn test_agent_id_prefix() {
        let id = AgentId::new();
        assert!(id.to_string().starts_with("agent_"));
    }

    #[test]
    fn test_framework_id_invalid_prefix() {
        let result: Result<FrameworkId, _> = "agent_01HV4Z2WQXKJNM8GPQY6VBKC3D".parse();
        assert!(result.is_err());
        assert!(result.unwrap_err().is_prefix_error());
    }

    #[test]
    fn test_framework_id_missing_separator() {
        let result: Result<FrameworkId, _> = "fw01HV4Z2WQXKJNM8GPQY6VBKC3D".parse();
        assert!(matches!(result.unwrap_err(), crate::IdError::MissingSeparator));
    }

    #[test]
    fn test_framework_id_empty() {
        let result: Result<FrameworkId, _> = "".parse();
        assert!(matches!(result.unwrap_err(), crate::IdError::Empty));
    }

    #[test]
    fn test_framework_id_invalid_ulid() {
        let result: Result<FrameworkId, _> = "fw_invalid".parse();
        assert!(matches!(result.unwrap_err(), crate::IdError::InvalidUlid(_)));
    }

    #[test]
    fn test_framework_id_json_roundtrip() {
        let id = FrameworkId::new();
        let json = serde_json::to_string(&id).unwrap();
        let parsed: FrameworkId = serde_json::from_str(&json).unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn test_framework_id_ordering_is_lexicographic() {
        // The fairness tie-break sorts by FrameworkId; ULID order must agree
        // with the order of the canonical string form.
        let a: FrameworkId = "fw_01HV4Z2WQXKJNM8GPQY6VBKC3D".parse().unwrap();
        let b: FrameworkId = "fw_01HV4Z3MXNKPQR9HSTZ7WCLD4E".parse().unwrap();
        assert!(a < b);
        assert!(a.to_string() < b.to_string());
    }

    #[test]
    fn test_filter_id_sortable() {
        let id1 = FilterId::new();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let id2 = FilterId::new();
        assert!(id1 < id2);
    }

    #[test]
    fn test_all_id_prefixes_unique() {
        let prefixes = [AgentId::PREFIX, FrameworkId::PREFIX, FilterId::PREFIX];

        let unique: std::collections::HashSet<_> = prefixes.iter().collect();
        assert_eq!(prefixes.len(), unique.len(), "Duplicate ID prefixes found!");
    }
}
