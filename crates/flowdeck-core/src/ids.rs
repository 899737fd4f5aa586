//! Identifier generation for workflows and nodes.
//!
//! Ids combine a human-readable prefix with the wall clock, so they sort
//! roughly by creation time. Uniqueness holds in practice but is not
//! guaranteed: two workflow ids minted from the same name in the same
//! millisecond collide, and node ids rely on a random suffix that is not
//! cryptographically strong. Never use these ids for concurrency control.

use std::sync::OnceLock;

use rand::Rng;
use regex::Regex;

const NODE_SUFFIX_LEN: usize = 8;
const BASE36: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

fn non_alphanumeric() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new("[^a-z0-9]+").expect("static regex"))
}

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Reduce a display name to `[a-z0-9_]`, collapsing separator runs.
pub fn slugify(name: &str) -> String {
    let lowered = name.to_lowercase();
    let collapsed = non_alphanumeric().replace_all(&lowered, "_");
    collapsed.trim_matches('_').to_string()
}

/// `"My Flow!"` becomes `my_flow_<unix-millis>`.
pub fn new_workflow_id(name: &str) -> String {
    let slug = slugify(name);
    let slug = if slug.is_empty() { "workflow" } else { slug.as_str() };
    format!("{}_{}", slug, now_millis())
}

/// `<agent_type>_<unix-millis>_<random base-36 suffix>`.
pub fn new_node_id(agent_type: &str) -> String {
    format!("{}_{}_{}", agent_type, now_millis(), random_suffix(NODE_SUFFIX_LEN))
}

fn random_suffix(len: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..len)
        .map(|_| BASE36[rng.gen_range(0..BASE36.len())] as char)
        .collect()
}
