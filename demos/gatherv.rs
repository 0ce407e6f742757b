//! Variable-count gather example.
//!
//! Every rank contributes between 2 and 5 elements set to its own rank.
//! Root learns the lengths in a first round, then receives the data with
//! matching displacements. A ScatterV of uneven shares runs first.
//!
//! Run with: cargo run --example gatherv

use ferrogroup::{local, partition_counts, Result};

fn main() -> Result<()> {
    env_logger::init();

    local::run(4, |world| -> Result<()> {
        let rank = world.rank();
        let size = world.size() as usize;

        // ============================================================
        // ScatterV of 10 elements over 4 ranks
        // ============================================================
        let counts = partition_counts(10, size);
        let data: Vec<u32> = if rank == 0 { (0..10).collect() } else { Vec::new() };
        let mine = world.scatterv(&data, &counts, 0)?;
        println!("Rank {rank}: scatterv share {mine:?}");

        // ============================================================
        // GatherV of locally chosen lengths
        // ============================================================
        let len = 2 + (rank as usize * 7 + 3) % 4;
        let send = vec![rank as f64; len];
        if let Some(gathered) = world.gatherv(&send, 0)? {
            println!("Rank {rank}: counts {:?}", gathered.counts());
            println!("  displacements {:?}", gathered.displacements());
            for (src, segment) in gathered.segments().enumerate() {
                println!("  from rank {src}: {segment:?}");
            }
        }
        Ok(())
    })?;
    Ok(())
}
