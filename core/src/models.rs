use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Event {
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub ip_address: Option<String>,
    #[serde(default)]
    pub risk_score: Option<f64>,
    #[serde(default)]
    pub entropy_score: Option<f64>,
    #[serde(default)]
    pub is_suspicious: bool,
    #[serde(default)]
    pub created_at: Option<String>,
}

impl Event {
    pub fn risk(&self) -> f64 {
        self.risk_score.unwrap_or(0.0)
    }

    pub fn entropy(&self) -> f64 {
        self.entropy_score.unwrap_or(0.0)
    }
}

/// Cluster as sent, with both generations of field names accepted
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawCluster {
    #[serde(default, alias = "users")]
    pub members: Option<Vec<String>>,
    #[serde(default, alias = "cluster_size")]
    pub size: Option<u64>,
    #[serde(default, alias = "risk")]
    pub avg_risk_score: Option<f64>,
    #[serde(default, alias = "hash")]
    pub behavior_hash: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Cluster {
    pub members: Vec<String>,
    pub size: u64,
    pub avg_risk_score: f64,
    pub behavior_hash: Option<String>,
}

impl From<RawCluster> for Cluster {
    fn from(raw: RawCluster) -> Self {
        let members = raw.members.unwrap_or_default();
        // an explicit member list is authoritative for the size
        let size = if members.is_empty() { raw.size.unwrap_or(0) } else { members.len() as u64 };
        Cluster {
            members,
            size,
            avg_risk_score: raw.avg_risk_score.unwrap_or(0.0),
            behavior_hash: raw.behavior_hash.filter(|h| !h.is_empty()),
        }
    }
}

/// `/api/clusters` answers with a bare list, or a wrapper when the graph
/// backend is unavailable
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ClustersPayload {
    List(Vec<RawCluster>),
    Wrapped {
        #[serde(default)]
        clusters: Vec<RawCluster>,
        #[serde(default)]
        error: Option<String>,
    },
}

impl ClustersPayload {
    pub fn into_clusters(self) -> (Vec<Cluster>, Option<String>) {
        match self {
            ClustersPayload::List(list) => (list.into_iter().map(Cluster::from).collect(), None),
            ClustersPayload::Wrapped { clusters, error } => {
                (clusters.into_iter().map(Cluster::from).collect(), error)
            }
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FrozenUser {
    pub user_id: String,
    #[serde(default)]
    pub ip_address: Option<String>,
    #[serde(default)]
    pub risk_score: Option<f64>,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub auth0_frozen: bool,
    #[serde(default)]
    pub blockchain_logged: bool,
    #[serde(default)]
    pub explorer_link: Option<String>,
    #[serde(default)]
    pub frozen_at: Option<String>,
}

/// List endpoints answer with an error object on backend trouble; anything
/// other than a list counts as no items
pub fn list_from<T: DeserializeOwned>(value: Value) -> Result<Vec<T>, serde_json::Error> {
    match value {
        Value::Array(_) => serde_json::from_value(value),
        _ => Ok(Vec::new()),
    }
}

/// Count of the frozen-users payload, shared by the badge and the stat tile
pub fn frozen_count_of(value: &Value) -> usize {
    value.as_array().map(Vec::len).unwrap_or(0)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FreezeAction {
    Freeze,
    Unfreeze,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FreezeLogEntry {
    #[serde(default)]
    pub user_id: Option<String>,
    pub action: FreezeAction,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub risk_score: Option<f64>,
    #[serde(default)]
    pub cluster_id: Option<String>,
    #[serde(default)]
    pub timestamp: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TeamMember {
    pub username: String,
    #[serde(default)]
    pub full_name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BlockchainStatus {
    #[serde(default)]
    pub configured: bool,
    #[serde(default)]
    pub network: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Balance {
    #[serde(default)]
    pub balance_algo: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Thresholds {
    pub cluster_size: u32,
    pub similarity: f64,
    pub risk_score: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct LoginRequest<'a> {
    pub username: &'a str,
    pub password: &'a str,
    pub remember_me: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct RegisterRequest<'a> {
    pub full_name: &'a str,
    pub username: &'a str,
    pub email: &'a str,
    pub password: &'a str,
    pub role: &'a str,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthResponse {
    pub token: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub full_name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Profile {
    pub username: String,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub full_name: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AttackEvents {
    #[serde(default)]
    pub legit: Vec<Event>,
    #[serde(default)]
    pub bots: Vec<Event>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RunAttackResponse {
    #[serde(default)]
    pub events: AttackEvents,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FreezeResult {
    pub user_id: String,
    #[serde(default)]
    pub ip_address: Option<String>,
    #[serde(default)]
    pub risk_score: Option<f64>,
    /// identity provider block succeeded
    #[serde(default)]
    pub auth0: bool,
    /// ledger record written, independent of `auth0`
    #[serde(default)]
    pub blockchain: bool,
    #[serde(default)]
    pub txid: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct FreezeAllResponse {
    #[serde(default)]
    pub frozen_users: Vec<FreezeResult>,
    #[serde(default)]
    pub frozen_count: Option<usize>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClusterCheck {
    #[serde(default)]
    pub flagged_count: usize,
    #[serde(default)]
    pub frozen_count: usize,
    #[serde(default)]
    pub frozen_users: Vec<String>,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Health {
    pub status: String,
    #[serde(default)]
    pub timestamp: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_cluster_accepts_both_naming_generations() {
        let old: RawCluster =
            serde_json::from_value(json!({"users": ["b1", "b2"], "cluster_size": 7, "risk": 0.8, "hash": "abc"})).unwrap();
        let new: RawCluster = serde_json::from_value(
            json!({"members": ["b1", "b2"], "size": 2, "avg_risk_score": 0.8, "behavior_hash": "abc"}),
        )
        .unwrap();

        let (old, new) = (Cluster::from(old), Cluster::from(new));
        assert_eq!(old, new);
        // members win over a disagreeing size
        assert_eq!(old.size, 2);
    }

    #[test]
    fn test_cluster_without_members_keeps_reported_size() {
        let raw: RawCluster = serde_json::from_value(json!({"size": 4, "behavior_hash": ""})).unwrap();
        let cluster = Cluster::from(raw);
        assert_eq!(cluster.size, 4);
        assert!(cluster.members.is_empty());
        assert_eq!(cluster.behavior_hash, None);
        assert_eq!(cluster.avg_risk_score, 0.0);
    }

    #[test]
    fn test_clusters_payload_shapes() {
        let list: ClustersPayload = serde_json::from_value(json!([{"members": ["a"]}])).unwrap();
        assert_eq!(list.into_clusters().0.len(), 1);

        let wrapped: ClustersPayload =
            serde_json::from_value(json!({"error": "graph offline", "clusters": []})).unwrap();
        let (clusters, error) = wrapped.into_clusters();
        assert!(clusters.is_empty());
        assert_eq!(error.as_deref(), Some("graph offline"));
    }

    #[test]
    fn test_frozen_users_non_list_is_empty() {
        assert!(list_from::<FrozenUser>(json!({"error": "db"})).unwrap().is_empty());
        assert_eq!(frozen_count_of(&json!({"error": "db"})), 0);

        let users: Vec<FrozenUser> = list_from(json!([{"user_id": "bot1", "auth0_frozen": true}])).unwrap();
        assert_eq!(users.len(), 1);
        assert!(users[0].auth0_frozen);
        assert!(!users[0].blockchain_logged);
    }

    #[test]
    fn test_freeze_log_unknown_action() {
        let entry: FreezeLogEntry = serde_json::from_value(json!({"user_id": "u", "action": "escalate"})).unwrap();
        assert_eq!(entry.action, FreezeAction::Unknown);
        let entry: FreezeLogEntry = serde_json::from_value(json!({"action": "unfreeze"})).unwrap();
        assert_eq!(entry.action, FreezeAction::Unfreeze);
    }

    #[test]
    fn test_event_tolerates_nulls() {
        let e: Event = serde_json::from_value(json!({"user_id": "alice", "risk_score": null})).unwrap();
        assert_eq!(e.risk(), 0.0);
        assert!(!e.is_suspicious);
    }
}
