//! Scatter, map on a rank-local pool, gather.

use ferrogroup::{
    local, Config, LocalDispatcher, RayonDispatcher, Result, SerialDispatcher,
};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn shards(size: usize, per_rank: usize) -> Vec<Vec<u64>> {
    (0..size)
        .map(|r| (0..per_rank).map(|i| (r * per_rank + i) as u64).collect())
        .collect()
}

#[test]
fn rayon_pool_maps_every_shard() {
    init_logging();
    let size = 4;
    let config = Config {
        local_threads: Some(2),
        ..Config::default()
    };
    let out = local::run_with_config(size, config, |world| {
        let dispatcher = RayonDispatcher::from_config(world.group().config())?;
        let input = (world.rank() == 0).then(|| shards(size, 10));
        world.map_shards(input, &dispatcher, |x| x * x, 0)
    })
    .unwrap();

    let mapped = out[0].as_ref().unwrap();
    assert_eq!(mapped.len(), size);
    for (shard_in, shard_out) in shards(size, 10).iter().zip(mapped) {
        assert_eq!(shard_in.len(), shard_out.len());
        for (x, y) in shard_in.iter().zip(shard_out) {
            assert_eq!(x * x, *y);
        }
    }
    assert!(out[1..].iter().all(Option::is_none));
}

#[test]
fn serial_and_rayon_agree() {
    init_logging();
    let run_with = |parallel: bool| {
        local::run(3, move |world| {
            let input = (world.rank() == 0).then(|| shards(3, 7));
            let f = |x: u64| format!("item-{x}");
            if parallel {
                world.map_shards(input, &RayonDispatcher::new(Some(2))?, f, 0)
            } else {
                world.map_shards(input, &SerialDispatcher, f, 0)
            }
        })
        .unwrap()
    };
    assert_eq!(run_with(true)[0], run_with(false)[0]);
}

#[test]
fn empty_shards_pass_through() {
    init_logging();
    let out = local::run(2, |world| -> Result<Option<Vec<Vec<i32>>>> {
        let input = (world.rank() == 1).then(|| vec![Vec::new(), vec![5]]);
        world.map_shards(input, &SerialDispatcher, |x: i32| x + 1, 1)
    })
    .unwrap();
    assert_eq!(out[1], Some(vec![Vec::new(), vec![6]]));
}

#[test]
fn dispatcher_usable_outside_a_group() {
    let dispatcher = RayonDispatcher::new(None).unwrap();
    let out = dispatcher
        .run_local((0..16).collect::<Vec<i32>>(), |x| x - 1)
        .unwrap();
    assert_eq!(out, (-1..15).collect::<Vec<_>>());
}
