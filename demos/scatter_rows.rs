//! Scatter example.
//!
//! Rank 0 holds a 4x5 matrix and hands one row to each rank, then a 3-D
//! array split along its first axis. The slices are doubled and gathered
//! back.
//!
//! Run with: cargo run --example scatter_rows

use ferrogroup::{local, NdArray, Result};

fn main() -> Result<()> {
    env_logger::init();
    let size = 4;

    local::run(size, |world| -> Result<()> {
        let rank = world.rank();

        // ============================================================
        // Rows of a matrix
        // ============================================================
        let matrix: Vec<i32> = if rank == 0 { (0..20).collect() } else { Vec::new() };
        let mut row = vec![0i32; 5];
        world.scatter(&matrix, &mut row, 0)?;
        println!("Rank {rank}: row {row:?}");

        // ============================================================
        // Slices of a 3-D array
        // ============================================================
        let full = if rank == 0 {
            let data = (0..size * 2 * 3).map(|x| x as f64).collect();
            Some(NdArray::from_shape_vec(&[size, 2, 3], data)?)
        } else {
            None
        };
        let mut slice = NdArray::zeros(&[2, 3]);
        world.scatter_array(full.as_ref(), &mut slice, 0)?;
        for x in slice.as_mut_slice() {
            *x *= 2.0;
        }
        if let Some(stacked) = world.gather_array(&slice, 0)? {
            println!("Rank {rank}: gathered shape {:?}", stacked.shape());
            println!("  last element {:?}", stacked.get(&[size - 1, 1, 2]));
        }
        Ok(())
    })?;
    Ok(())
}
