//! Integration tests for multi-rank worlds.

use std::thread;

use fabric::{AccessFlags, Endpoint, Error, FabricConfig, GROUP_ALL, Timeout, World};

fn run_world<T, F>(n: usize, f: F) -> Vec<T>
where
    T: Send + 'static,
    F: Fn(Endpoint) -> T + Send + Sync + Clone + 'static,
{
    let endpoints = World::create(FabricConfig::default(), n).unwrap();
    let handles: Vec<_> = endpoints
        .into_iter()
        .map(|ep| {
            let f = f.clone();
            thread::spawn(move || f(ep))
        })
        .collect();
    handles.into_iter().map(|h| h.join().unwrap()).collect()
}

#[test]
fn test_ring_write_notify() {
    let n = 4;
    let results = run_world(n, move |ep| {
        let me = ep.rank();
        ep.segment_create(1, 64, GROUP_ALL, AccessFlags::all()).unwrap();
        let base = ep.segment_ptr(1).unwrap();
        unsafe { base.write(me as u8 + 10) };

        let right = ((me as usize + 1) % n) as u16;
        ep.write_notify(1, 0, right, 1, 8, 1, me as u32, 42, 0).unwrap();
        ep.wait(0).unwrap();

        let left = ((me as usize + n - 1) % n) as u32;
        let id = ep.notify_waitsome(1, 0, n as u32, Timeout::Block).unwrap();
        assert_eq!(id, Some(left));
        assert_eq!(ep.notify_reset(1, left).unwrap(), 42);
        let got = unsafe { base.add(8).read() };
        ep.barrier(GROUP_ALL).unwrap();
        ep.segment_delete(1).unwrap();
        got
    });
    assert_eq!(results, vec![13, 10, 11, 12]);
}

#[test]
fn test_read_from_peer() {
    let results = run_world(2, |ep| {
        ep.segment_create(4, 16, GROUP_ALL, AccessFlags::all()).unwrap();
        let base = ep.segment_ptr(4).unwrap();
        unsafe { base.write(ep.rank() as u8 + 1) };
        ep.barrier(GROUP_ALL).unwrap();
        let peer = 1 - ep.rank();
        ep.read(4, 8, peer, 4, 0, 1, 2).unwrap();
        ep.wait(2).unwrap();
        let got = unsafe { base.add(8).read() };
        ep.barrier(GROUP_ALL).unwrap();
        got
    });
    assert_eq!(results, vec![2, 1]);
}

#[test]
fn test_bound_segment_is_private_until_registered() {
    let results = run_world(2, |ep| {
        let mut buf = vec![0u8; 8];
        unsafe {
            ep.segment_bind(9, buf.as_mut_ptr(), buf.len(), AccessFlags::all())
                .unwrap();
        }
        ep.segment_create(1, 8, GROUP_ALL, AccessFlags::all()).unwrap();
        let peer = 1 - ep.rank();
        let denied = matches!(
            ep.write(1, 0, peer, 9, 0, 4, 0),
            Err(Error::SegmentNotRegistered { .. })
        );
        ep.barrier(GROUP_ALL).unwrap();
        ep.segment_register(9, peer).unwrap();
        ep.barrier(GROUP_ALL).unwrap();
        ep.write(1, 0, peer, 9, 0, 4, 0).unwrap();
        ep.wait(0).unwrap();
        ep.barrier(GROUP_ALL).unwrap();
        ep.segment_delete(9).unwrap();
        denied
    });
    assert_eq!(results, vec![true, true]);
}

#[test]
fn test_group_allreduce_is_deterministic() {
    let results = run_world(5, |ep| {
        ep.group_create(3, &[4, 0, 2]).ok();
        let mut sum = [0u8; 2];
        if ep.rank() % 2 == 0 {
            ep.allreduce_user(3, &[ep.rank() as u8, 1], &mut sum, |acc, other| {
                acc.iter_mut().zip(other).for_each(|(a, b)| *a += b)
            })
            .unwrap();
            ep.group_delete(3).unwrap();
        }
        sum
    });
    assert_eq!(results, vec![[6, 3], [0, 0], [6, 3], [0, 0], [6, 3]]);
}

#[test]
fn test_fresh_groups_for_disjoint_pairs() {
    let results = run_world(4, |ep| {
        let pair = [ep.rank() & !1, ep.rank() | 1];
        let outer = ep.group_create_fresh(&pair).unwrap();
        let inner = ep.group_create_fresh(&pair).unwrap();
        let mut sum = [0u8];
        ep.allreduce_user(inner, &[ep.rank() as u8], &mut sum, |acc, other| acc[0] += other[0])
            .unwrap();
        ep.barrier(outer).unwrap();
        ep.group_delete(inner).unwrap();
        ep.group_delete(outer).unwrap();
        (outer, inner, sum[0])
    });
    let ids: Vec<_> = results.iter().flat_map(|&(o, i, _)| [o, i]).collect();
    assert_eq!(results[0].0, results[1].0);
    assert_eq!(results[2].1, results[3].1);
    let mut distinct = vec![ids[0], ids[1], ids[4], ids[5]];
    distinct.sort_unstable();
    distinct.dedup();
    assert_eq!(distinct.len(), 4);
    assert!(!distinct.contains(&GROUP_ALL));
    assert_eq!(
        results.iter().map(|r| r.2).collect::<Vec<_>>(),
        vec![1, 1, 5, 5]
    );
}

#[test]
fn test_non_member_cannot_create_group() {
    let results = run_world(2, |ep| ep.group_create(7, &[0]).is_ok());
    assert_eq!(results, vec![true, false]);
}

#[test]
fn test_passive_exchange() {
    let results = run_world(3, |ep| {
        ep.segment_create(2, 16, GROUP_ALL, AccessFlags::all()).unwrap();
        let base = ep.segment_ptr(2).unwrap();
        let out = if ep.rank() == 0 {
            let mut from = Vec::new();
            for _ in 0..2 {
                let rank = ep.passive_receive(2, 4, 3).unwrap();
                let got = unsafe { std::slice::from_raw_parts(base.add(4), 3) };
                assert_eq!(got, &[rank as u8; 3]);
                from.push(rank);
            }
            from.sort_unstable();
            from
        } else {
            unsafe { base.write_bytes(ep.rank() as u8, 3) };
            ep.passive_send(2, 0, 0, 3).unwrap();
            Vec::new()
        };
        ep.barrier(GROUP_ALL).unwrap();
        out
    });
    assert_eq!(results[0], vec![1, 2]);
}

#[test]
fn test_passive_oversize_message() {
    let results = run_world(2, |ep| {
        ep.segment_create(2, 16, GROUP_ALL, AccessFlags::all()).unwrap();
        let r = if ep.rank() == 0 {
            ep.passive_receive(2, 0, 4).map(|_| ())
        } else {
            ep.passive_send(2, 0, 0, 8)
        };
        matches!(r, Err(Error::MessageTooLarge { size: 8, max: 4 }))
    });
    assert_eq!(results, vec![true, true]);
}

#[test]
fn test_concurrent_fetch_add() {
    let n = 4;
    let results = run_world(n, move |ep| {
        ep.segment_create(5, 8, GROUP_ALL, AccessFlags::all()).unwrap();
        for _ in 0..100 {
            ep.atomic_fetch_add(0, 5, 0, 1).unwrap();
        }
        ep.barrier(GROUP_ALL).unwrap();
        let total = if ep.rank() == 0 {
            unsafe { ep.segment_ptr(5).unwrap().cast::<u64>().read() }
        } else {
            0
        };
        ep.barrier(GROUP_ALL).unwrap();
        total
    });
    assert_eq!(results[0], 400);
}

#[test]
fn test_waitsome_fails_when_segment_is_deleted() {
    let endpoints = World::create(FabricConfig::default(), 1).unwrap();
    let ep = std::sync::Arc::new(endpoints.into_iter().next().unwrap());
    ep.segment_create(6, 8, GROUP_ALL, AccessFlags::all()).unwrap();
    let waiter = {
        let ep = std::sync::Arc::clone(&ep);
        thread::spawn(move || ep.notify_waitsome(6, 0, 1, Timeout::Block))
    };
    thread::sleep(std::time::Duration::from_millis(20));
    ep.segment_delete(6).unwrap();
    assert!(matches!(
        waiter.join().unwrap(),
        Err(Error::InvalidSegment { segment: 6, .. })
    ));
}
