//! Scatter, local pool, gather.
//!
//! Rank 0 splits a workload into one shard per rank; every rank squares its
//! shard on a private rayon pool and root collects the results.
//!
//! Run: `FERROGROUP_LOCAL_THREADS=2 cargo run --example hybrid_pipeline`

use ferrogroup::{local, partition_counts, OrAbort, RayonDispatcher, Result};

fn main() -> Result<()> {
    env_logger::init();

    let results = local::run(4, |world| -> Result<Option<u64>> {
        let rank = world.rank();
        let size = world.size() as usize;

        let dispatcher = RayonDispatcher::from_config(world.group().config()).or_abort(rank);
        println!(
            "Rank {rank}/{size}: using {} local threads",
            dispatcher.threads()
        );

        let shards = (rank == 0).then(|| {
            let mut next = 0u64;
            partition_counts(1000, size)
                .into_iter()
                .map(|n| {
                    let shard: Vec<u64> = (next..next + n as u64).collect();
                    next += n as u64;
                    shard
                })
                .collect()
        });

        let mapped = world.map_shards(shards, &dispatcher, |x| x * x, 0)?;
        Ok(mapped.map(|shards| shards.iter().flatten().sum()))
    })?;

    if let Some(total) = results[0] {
        println!("Sum of squares below 1000: {total}");
    }
    Ok(())
}
