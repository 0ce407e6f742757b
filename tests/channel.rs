//! Point-to-point traffic between ranks of an in-process group.

use ferrogroup::{local, Error, NdArray, Request, Result, Value};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

#[test]
fn mapping_travels_between_two_ranks() {
    init_logging();
    let received = local::run(2, |world| -> Result<Option<Value>> {
        if world.rank() == 0 {
            let data = Value::map([("a", Value::Int(7)), ("b", Value::Float(3.5))])?;
            world.send_value(&data, 1, 11)?;
            Ok(None)
        } else {
            Ok(Some(world.recv_value::<Value>(0, 11)?))
        }
    })
    .unwrap();
    let data = received[1].as_ref().unwrap();
    assert_eq!(data.get("a"), Some(&Value::Int(7)));
    assert_eq!(data.get("b"), Some(&Value::Float(3.5)));
    assert!(received[0].is_none());
}

#[test]
fn typed_buffer_fills_declared_receive() {
    init_logging();
    let out = local::run(2, |world| -> Result<Vec<f64>> {
        let mut data = vec![0.0f64; 1000];
        if world.rank() == 0 {
            for (i, x) in data.iter_mut().enumerate() {
                *x = i as f64;
            }
            world.send(&data, 1, 77)?;
        } else {
            let status = world.recv(&mut data, 0, 77)?;
            assert_eq!(status.count, 1000);
            assert_eq!(status.source, 0);
            assert_eq!(status.tag, 77);
        }
        Ok(data)
    })
    .unwrap();
    assert_eq!(out[0], out[1]);
}

#[test]
fn same_tag_messages_arrive_in_order() {
    init_logging();
    local::run(2, |world| -> Result<()> {
        if world.rank() == 0 {
            for i in 0..50i64 {
                world.send_value(&i, 1, 5)?;
            }
            world.send_value("other tag", 1, 6)?;
        } else {
            let other: String = world.recv_value(0, 6)?;
            assert_eq!(other, "other tag");
            for i in 0..50i64 {
                assert_eq!(world.recv_value::<i64>(0, 5)?, i);
            }
        }
        Ok(())
    })
    .unwrap();
}

#[test]
fn nested_structured_values_survive() {
    init_logging();
    local::run(2, |world| -> Result<()> {
        let grid = NdArray::from_shape_vec(&[2, 2], vec![1.0, 2.0, 3.0, 4.0])?;
        let value = Value::Seq(vec![
            Value::Complex { re: 1.0, im: -1.0 },
            Value::Bytes(vec![0, 255]),
            Value::map([("grid", Value::Array(grid)), ("ok", Value::Bool(true))])?,
        ]);
        if world.rank() == 0 {
            world.send_value(&value, 1, 0)?;
        } else {
            assert_eq!(world.recv_value::<Value>(0, 0)?, value);
        }
        Ok(())
    })
    .unwrap();
}

#[test]
fn nonblocking_requests_complete_once() {
    init_logging();
    local::run(2, |world| -> Result<()> {
        if world.rank() == 0 {
            let data = Value::map([("a", Value::Int(7)), ("b", Value::Float(3.5))])?;
            let mut req = world.isend_value(&data, 1, 11)?;
            req.wait()?;
            assert!(req.is_completed());
            assert!(matches!(req.wait(), Err(Error::RequestAlreadyCompleted)));
        } else {
            let mut req = world.irecv_value::<Value>(0, 11)?;
            let data = req.wait()?;
            assert_eq!(data.get("a"), Some(&Value::Int(7)));
            assert!(matches!(req.test(), Err(Error::RequestAlreadyCompleted)));
        }
        Ok(())
    })
    .unwrap();
}

#[test]
fn test_polls_until_the_message_lands() {
    init_logging();
    local::run(2, |world| -> Result<()> {
        if world.rank() == 0 {
            // Wait for the receiver to post and poll once before sending.
            let _: bool = world.recv_value(1, 1)?;
            world.send(&[1u32, 2, 3], 1, 2)?;
        } else {
            let mut req = world.irecv::<u32>(3, 0, 2)?;
            assert_eq!(req.test()?, None);
            world.send_value(&true, 0, 1)?;
            let data = loop {
                if let Some(data) = req.test()? {
                    break data;
                }
                std::thread::yield_now();
            };
            assert_eq!(data, vec![1, 2, 3]);
        }
        Ok(())
    })
    .unwrap();
}

#[test]
fn wait_all_keeps_request_order() {
    init_logging();
    local::run(3, |world| -> Result<()> {
        if world.rank() == 0 {
            let requests = vec![world.irecv_value::<i32>(1, 0)?, world.irecv_value::<i32>(2, 0)?];
            assert_eq!(Request::wait_all(requests)?, vec![10, 20]);
        } else {
            let mut req = world.isend_value(&(world.rank() * 10), 0, 0)?;
            req.wait()?;
        }
        Ok(())
    })
    .unwrap();
}

#[test]
fn receive_with_wrong_count_is_rejected() {
    init_logging();
    let outcome = local::run(2, |world| -> Result<()> {
        if world.rank() == 0 {
            world.send(&[1i32, 2, 3, 4], 1, 0)?;
            // Keep rank 0 in the group until rank 1 has checked its receive.
            let _: () = world.recv_value(1, 1)?;
        } else {
            let mut short = [0i32; 3];
            let err = world.recv(&mut short, 0, 0).unwrap_err();
            assert!(matches!(
                err,
                Error::BufferSizeMismatch {
                    expected: 3,
                    actual: 4,
                    ..
                }
            ));
            assert_eq!(short, [0, 0, 0]);
            world.send_value(&(), 0, 1)?;
        }
        Ok(())
    });
    assert!(outcome.is_ok());
}

#[test]
fn receive_with_wrong_type_is_rejected() {
    init_logging();
    local::run(2, |world| -> Result<()> {
        if world.rank() == 0 {
            world.send(&[1.0f32, 2.0], 1, 0)?;
        } else {
            let mut buf = [0i32; 2];
            assert!(matches!(
                world.recv(&mut buf, 0, 0),
                Err(Error::DatatypeMismatch { .. })
            ));
        }
        Ok(())
    })
    .unwrap();
}

#[test]
fn self_and_out_of_range_peers_are_unreachable() {
    init_logging();
    local::run(2, |world| -> Result<()> {
        let me = world.rank();
        for peer in [me, -1, 2] {
            assert!(matches!(
                world.send_value(&1, peer, 0),
                Err(Error::UnreachableRank { rank, .. }) if rank == peer
            ));
        }
        assert!(matches!(
            world.irecv::<f64>(1, 5, 0),
            Err(Error::UnreachableRank { rank: 5, .. })
        ));
        Ok(())
    })
    .unwrap();
}
