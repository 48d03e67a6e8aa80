use rotor_core::NodeId;

/// Decides which node leads a round
pub trait Election: Send + Sync {
    fn leader_for(&self, round: u64) -> Option<NodeId>;

    fn is_leader(&self, node: NodeId, round: u64) -> bool {
        self.leader_for(round) == Some(node)
    }
}

/// Leadership rotates through a fixed member list, one round each
#[derive(Debug, Clone)]
pub struct RoundRobin {
    members: Vec<NodeId>,
}

impl RoundRobin {
    pub fn new(members: Vec<NodeId>) -> Self {
        RoundRobin { members }
    }

    /// Members `node0..node{n-1}`
    pub fn with_size(n: u32) -> Self {
        Self::new((0..n).map(NodeId).collect())
    }

    pub fn members(&self) -> &[NodeId] {
        &self.members
    }
}

impl Election for RoundRobin {
    fn leader_for(&self, round: u64) -> Option<NodeId> {
        if self.members.is_empty() {
            return None;
        }
        let index = (round % self.members.len() as u64) as usize;
        self.members.get(index).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exactly_one_leader_per_round() {
        let election = RoundRobin::with_size(3);
        for round in 0..30u64 {
            let leaders: Vec<NodeId> = election
                .members()
                .iter()
                .copied()
                .filter(|node| election.is_leader(*node, round))
                .collect();
            assert_eq!(leaders, vec![NodeId((round % 3) as u32)]);
        }
    }

    #[test]
    fn test_member_order_is_rotation_order() {
        let election = RoundRobin::new(vec![NodeId(7), NodeId(2)]);
        assert_eq!(election.leader_for(0), Some(NodeId(7)));
        assert_eq!(election.leader_for(1), Some(NodeId(2)));
        assert_eq!(election.leader_for(2), Some(NodeId(7)));
    }

    #[test]
    fn test_empty_membership_has_no_leader() {
        let election = RoundRobin::new(Vec::new());
        assert_eq!(election.leader_for(0), None);
        assert!(!election.is_leader(NodeId(0), 0));
    }
}
