/// Consistent-hash ring of virtual nodes.
///
/// Each real node contributes `replicas` points hashed from the replica
/// index concatenated with the node id; a key routes to the first point at
/// or clockwise-after its own hash.
pub struct Ring {
    replicas: usize,
    /// `(hash, node id)` pairs sorted by hash.
    points: Vec<(u32, String)>,
}

impl Ring {
    pub fn new(replicas: usize) -> Self {
        Ring {
            replicas: replicas.max(1),
            points: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn add_nodes<S: AsRef<str>>(&mut self, nodes: &[S]) {
        for node in nodes {
            let node = node.as_ref();
            if node.is_empty() {
                continue;
            }
            for replica in 0..self.replicas {
                let hash = crc32fast::hash(format!("{replica}{node}").as_bytes());
                self.points.push((hash, node.to_string()));
            }
        }
        self.points.sort_unstable_by(|a, b| a.0.cmp(&b.0));
    }

    /// Owning node for a key, honoring `{tag}` hash-tag extraction.
    pub fn pick_node(&self, key: &str) -> Option<&str> {
        if self.points.is_empty() {
            return None;
        }
        let hash = crc32fast::hash(partition_key(key).as_bytes());
        let mut index = self.points.partition_point(|(point, _)| *point < hash);
        if index == self.points.len() {
            index = 0;
        }
        Some(&self.points[index].1)
    }
}

/// Only the content of the first `{...}` group participates in routing, so
/// co-tagged keys land on one node. Empty or unterminated groups fall back
/// to the whole key.
fn partition_key(key: &str) -> &str {
    let begin = match key.find('{') {
        Some(begin) => begin,
        None => return key,
    };
    match key[begin + 1..].find('}') {
        Some(0) | None => key,
        Some(offset) => &key[begin + 1..begin + 1 + offset],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn three_node_ring() -> Ring {
        let mut ring = Ring::new(4);
        ring.add_nodes(&["10.0.0.1:6399", "10.0.0.2:6399", "10.0.0.3:6399"]);
        ring
    }

    #[test]
    fn hash_tag_extraction() {
        assert_eq!(partition_key("user:1000"), "user:1000");
        assert_eq!(partition_key("{user}:profile"), "user");
        assert_eq!(partition_key("cart{user}:items"), "user");
        assert_eq!(partition_key("{}empty"), "{}empty");
        assert_eq!(partition_key("open{brace"), "open{brace");
        assert_eq!(partition_key("{a}{b}"), "a");
    }

    #[test]
    fn co_tagged_keys_share_a_node() {
        let ring = three_node_ring();
        let a = ring.pick_node("order:{alice}:1").unwrap().to_string();
        let b = ring.pick_node("cart:{alice}:9").unwrap().to_string();
        let c = ring.pick_node("{alice}").unwrap().to_string();
        assert_eq!(a, b);
        assert_eq!(b, c);
    }

    #[test]
    fn picks_are_stable_under_readding_existing_nodes() {
        let mut ring = three_node_ring();
        let keys: Vec<String> = (0..64).map(|i| format!("key-{i}")).collect();
        let before: Vec<String> = keys
            .iter()
            .map(|k| ring.pick_node(k).unwrap().to_string())
            .collect();

        ring.add_nodes(&["10.0.0.2:6399"]);
        let after: Vec<String> = keys
            .iter()
            .map(|k| ring.pick_node(k).unwrap().to_string())
            .collect();
        assert_eq!(before, after);
    }

    #[test]
    fn every_key_routes_somewhere_and_distribution_is_spread() {
        let ring = three_node_ring();
        let mut seen = std::collections::HashSet::new();
        for i in 0..512 {
            seen.insert(ring.pick_node(&format!("k{i}")).unwrap().to_string());
        }
        assert_eq!(seen.len(), 3);
    }

    #[test]
    fn empty_ring_picks_nothing() {
        let ring = Ring::new(4);
        assert!(ring.pick_node("anything").is_none());
        assert!(ring.is_empty());
    }
}
