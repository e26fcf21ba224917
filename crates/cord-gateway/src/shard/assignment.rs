//! Guild to shard assignment

use cord_core::Snowflake;
use std::collections::{BTreeMap, BTreeSet};

/// Shard that receives events for `guild_id`: `(guild_id >> 22) % shard_count`
#[inline]
pub fn shard_for_guild(guild_id: Snowflake, shard_count: u32) -> u32 {
    guild_id.shard_id(shard_count)
}

/// Which guilds each shard carries
///
/// A pure function of the guild set and the shard count. It is never mutated in place; updates
/// build a new value that replaces the old one.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShardAssignment {
    shard_count: u32,
    shards: BTreeMap<u32, BTreeSet<Snowflake>>,
}

impl ShardAssignment {
    pub fn compute(guilds: impl IntoIterator<Item = Snowflake>, shard_count: u32) -> Self {
        let shard_count = shard_count.max(1);
        let mut shards: BTreeMap<u32, BTreeSet<Snowflake>> = BTreeMap::new();
        for guild in guilds {
            shards
                .entry(shard_for_guild(guild, shard_count))
                .or_default()
                .insert(guild);
        }
        Self {
            shard_count,
            shards,
        }
    }

    /// Empty assignment for `shard_count` shards
    pub fn empty(shard_count: u32) -> Self {
        Self::compute(std::iter::empty(), shard_count)
    }

    pub fn shard_count(&self) -> u32 {
        self.shard_count
    }

    pub fn shard_for(&self, guild_id: Snowflake) -> u32 {
        shard_for_guild(guild_id, self.shard_count)
    }

    /// Guilds carried by `shard_id`
    pub fn guilds(&self, shard_id: u32) -> impl Iterator<Item = Snowflake> + '_ {
        self.shards.get(&shard_id).into_iter().flatten().copied()
    }

    pub fn all_guilds(&self) -> impl Iterator<Item = Snowflake> + '_ {
        self.shards.values().flatten().copied()
    }

    pub fn guild_count(&self) -> usize {
        self.shards.values().map(BTreeSet::len).sum()
    }

    pub fn contains(&self, guild_id: Snowflake) -> bool {
        self.shards
            .get(&self.shard_for(guild_id))
            .is_some_and(|guilds| guilds.contains(&guild_id))
    }

    /// New assignment with `guilds` added
    #[must_use]
    pub fn with_guilds(&self, guilds: impl IntoIterator<Item = Snowflake>) -> Self {
        Self::compute(self.all_guilds().chain(guilds), self.shard_count)
    }

    /// Same guilds spread over `shard_count` shards
    #[must_use]
    pub fn resharded(&self, shard_count: u32) -> Self {
        Self::compute(self.all_guilds(), shard_count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_guild_maps_reproducibly() {
        let guild = Snowflake::new(100_000_000_000_000_000);
        let shard = shard_for_guild(guild, 2);
        assert_eq!(shard, ((100_000_000_000_000_000u64 >> 22) % 2) as u32);
        for _ in 0..10 {
            assert_eq!(shard_for_guild(guild, 2), shard);
        }
    }

    #[test]
    fn test_assignment_is_total_and_disjoint() {
        let guilds: Vec<Snowflake> = (1..=200u64).map(|n| Snowflake::new(n << 22 | n)).collect();
        let assignment = ShardAssignment::compute(guilds.iter().copied(), 7);

        assert_eq!(assignment.guild_count(), guilds.len());
        for guild in &guilds {
            let shard = assignment.shard_for(*guild);
            assert!(shard < 7);
            assert!(assignment.guilds(shard).any(|g| g == *guild));
        }
    }

    #[test]
    fn test_order_of_input_does_not_matter() {
        let guilds: Vec<Snowflake> = (1..=50u64).map(|n| Snowflake::new(n << 22)).collect();
        let forward = ShardAssignment::compute(guilds.iter().copied(), 4);
        let backward = ShardAssignment::compute(guilds.iter().rev().copied(), 4);
        assert_eq!(forward, backward);
    }

    #[test]
    fn test_with_guilds_builds_new_value() {
        let first = ShardAssignment::compute([Snowflake::new(1 << 22)], 2);
        let second = first.with_guilds([Snowflake::new(2 << 22)]);

        assert_eq!(first.guild_count(), 1);
        assert_eq!(second.guild_count(), 2);
        assert!(second.contains(Snowflake::new(1 << 22)));
        assert_eq!(second.guilds(0).collect::<Vec<_>>(), vec![Snowflake::new(2 << 22)]);
    }

    #[test]
    fn test_reshard_moves_guilds() {
        let guilds = [Snowflake::new(3 << 22), Snowflake::new(4 << 22)];
        let one = ShardAssignment::compute(guilds, 1);
        assert_eq!(one.guilds(0).count(), 2);

        let two = one.resharded(2);
        assert_eq!(two.shard_count(), 2);
        assert_eq!(two.guilds(0).collect::<Vec<_>>(), vec![guilds[1]]);
        assert_eq!(two.guilds(1).collect::<Vec<_>>(), vec![guilds[0]]);
    }

    #[test]
    fn test_zero_shards_treated_as_one() {
        let assignment = ShardAssignment::empty(0);
        assert_eq!(assignment.shard_count(), 1);
        assert_eq!(assignment.shard_for(Snowflake::new(u64::MAX)), 0);
    }
}
