//! One-sided transfers, handles and the request table.

mod common;

use common::{int, long, payload, run, run_with, test_config};
use fabric::FabricConfig;
use pgas::{
    ErrorKind, GlobalPtr, Handle, Runtime, SegmentId, TEAM_ALL, bytes_of, bytes_of_mut,
};

/// Allocate `nbytes` on every unit and return this unit's pointer.
///
/// Allocation is deterministic, so every unit's pointer has the same offset.
fn alloc_everywhere(rt: &Runtime, nbytes: usize) -> pgas::Result<GlobalPtr> {
    let gptr = rt.memalloc(nbytes)?;
    let mut offsets = vec![0i64; rt.size()];
    rt.allgather(
        bytes_of(&[gptr.offset as i64]),
        bytes_of_mut(&mut offsets),
        1,
        &long(),
        TEAM_ALL,
    )?;
    assert!(offsets.iter().all(|&o| o == gptr.offset as i64));
    Ok(gptr)
}

fn right(rt: &Runtime, gptr: GlobalPtr) -> GlobalPtr {
    gptr.with_unit((rt.myid().0 + 1) % rt.size() as u32)
}

fn stall_all(rt: &Runtime) {
    let ep = rt.endpoint();
    for q in 0..ep.queue_num() {
        ep.stall_queue(q as u8).unwrap();
    }
}

fn resume_all(rt: &Runtime) {
    let ep = rt.endpoint();
    for q in 0..ep.queue_num() {
        ep.resume_queue(q as u8).unwrap();
    }
}

#[test]
fn test_blocking_put_get_ring() {
    let n = 4;
    let results = run(n, |rt| {
        let me = rt.myid().0;
        let mine = alloc_everywhere(rt, 8 * 4)?;
        rt.put_blocking(right(rt, mine), bytes_of(&payload(me, 8)), 8, &int(), &int())?;
        rt.barrier(TEAM_ALL)?;

        let mut local = vec![0i32; 8];
        rt.get_blocking(bytes_of_mut(&mut local), mine, 8, &int(), &int())?;
        let mut remote = vec![0i32; 8];
        rt.get_blocking(bytes_of_mut(&mut remote), right(rt, mine), 8, &int(), &int())?;
        rt.barrier(TEAM_ALL)?;
        rt.memfree(mine)?;
        Ok((local, remote))
    });
    for (me, (local, remote)) in results.into_iter().enumerate() {
        let left = (me + n - 1) % n;
        assert_eq!(local, payload(left as u32, 8));
        assert_eq!(remote, payload(me as u32, 8));
    }
}

#[test]
fn test_request_table_flush_returns_segments() {
    let results = run(3, |rt| {
        let cap = rt.pool().capacity();
        let me = rt.myid().0;
        let mine = alloc_everywhere(rt, 3 * 8)?;
        let target = right(rt, mine);
        let chunks: Vec<Vec<i64>> = (0..3).map(|i| vec![i64::from(me) * 100 + i]).collect();
        for (i, chunk) in chunks.iter().enumerate() {
            unsafe { rt.put(target.add(8 * i as u64), bytes_of(chunk), 1, &long(), &long())? };
        }
        assert_eq!(rt.pending_requests(), 1);
        assert_eq!(rt.pool().free_count(), cap - 3);
        rt.flush(target)?;
        assert_eq!(rt.pending_requests(), 0);
        assert_eq!(rt.pool().free_count(), cap);
        // Nothing outstanding.
        rt.flush(target)?;
        rt.barrier(TEAM_ALL)?;

        let mut back = vec![0i64; 3];
        unsafe { rt.get(bytes_of_mut(&mut back), target, 3, &long(), &long())? };
        rt.flush_all(mine)?;
        assert_eq!(rt.pool().free_count(), cap);
        rt.barrier(TEAM_ALL)?;
        Ok(back)
    });
    for (me, back) in results.into_iter().enumerate() {
        let me = me as i64;
        assert_eq!(back, vec![me * 100, me * 100 + 1, me * 100 + 2]);
    }
}

#[test]
fn test_flush_all_covers_every_unit() {
    let results = run(3, |rt| {
        let cap = rt.pool().capacity();
        let mine = alloc_everywhere(rt, 8)?;
        let data = [[11i64], [22i64]];
        if rt.myid().0 == 0 {
            for (unit, value) in [1u32, 2].into_iter().zip(&data) {
                unsafe { rt.put(mine.with_unit(unit), bytes_of(value), 1, &long(), &long())? };
            }
            assert_eq!(rt.pending_requests(), 2);
            assert_eq!(rt.pool().free_count(), cap - 2);
            rt.flush_all(mine)?;
            assert_eq!(rt.pending_requests(), 0);
            assert_eq!(rt.pool().free_count(), cap);
        }
        rt.barrier(TEAM_ALL)?;
        let mut out = [0i64];
        rt.get_blocking(bytes_of_mut(&mut out), mine, 1, &long(), &long())?;
        rt.barrier(TEAM_ALL)?;
        rt.memfree(mine)?;
        Ok(out[0])
    });
    assert_eq!(results[1], 11);
    assert_eq!(results[2], 22);
}

#[test]
fn test_failed_handle_post_drains_before_release() {
    // Room for the transfer and one notification only.
    let fabric = FabricConfig::default()
        .with_queue_num(1)
        .with_queue_size_max(2);
    let results = run_with(2, fabric, test_config(), |rt| {
        let cap = rt.pool().capacity();
        let mine = rt.memalloc(8)?;
        rt.barrier(TEAM_ALL)?;
        if rt.myid().0 == 0 {
            let ep = rt.endpoint();
            ep.stall_queue(0)?;
            let src = [77i64];
            let kind = unsafe {
                rt.put_handle(mine.with_unit(1), bytes_of(&src), 1, &long(), &long())
            }
            .err()
            .map(|e| e.kind());
            assert_eq!(kind, Some(ErrorKind::Communication));
            assert_eq!(ep.queue_size(0)?, 0);
            assert_eq!(rt.pool().free_count(), cap);
            ep.resume_queue(0)?;
        }
        rt.barrier(TEAM_ALL)?;
        let mut out = [0i64];
        rt.get_blocking(bytes_of_mut(&mut out), mine, 1, &long(), &long())?;
        rt.barrier(TEAM_ALL)?;
        rt.memfree(mine)?;
        Ok(out[0])
    });
    assert_eq!(results[1], 77);
}

#[test]
fn test_local_target_needs_no_segment() {
    let results = run(2, |rt| {
        let cap = rt.pool().capacity();
        let mine = rt.memalloc(16)?;
        let mut h = unsafe { rt.put_handle(mine, bytes_of(&[1i64, 2]), 2, &long(), &long())? };
        assert!(h.is_null());
        rt.wait(&mut h)?;
        unsafe { rt.put(mine, bytes_of(&[3i64]), 1, &long(), &long())? };
        assert_eq!(rt.pending_requests(), 0);
        let mut out = [0i64; 2];
        rt.get_blocking(bytes_of_mut(&mut out), mine, 2, &long(), &long())?;
        assert_eq!(rt.pool().free_count(), cap);
        Ok(out)
    });
    assert_eq!(results, vec![[3, 2], [3, 2]]);
}

#[test]
fn test_handle_wait_nulls_and_restores_pool() {
    let results = run(3, |rt| {
        let cap = rt.pool().capacity();
        let me = rt.myid().0;
        let mine = alloc_everywhere(rt, 64)?;
        let src = payload(me, 4);
        let mut put = unsafe { rt.put_handle(right(rt, mine), bytes_of(&src), 4, &int(), &int())? };
        assert!(!put.is_null());
        rt.wait(&mut put)?;
        assert!(put.is_null());
        assert_eq!(rt.pool().free_count(), cap);
        // Freeing a null handle is a no-op.
        rt.handle_free(&mut put)?;
        rt.barrier(TEAM_ALL)?;

        let mut got = vec![0i32; 4];
        let mut get = unsafe { rt.get_handle(bytes_of_mut(&mut got), right(rt, mine), 4, &int(), &int())? };
        while !rt.test(&mut get)? {
            std::thread::yield_now();
        }
        assert!(get.is_null());
        assert_eq!(rt.pool().free_count(), cap);
        rt.barrier(TEAM_ALL)?;
        Ok(got)
    });
    for (me, got) in results.into_iter().enumerate() {
        assert_eq!(got, payload(me as u32, 4));
    }
}

#[test]
fn test_pending_handle_leaves_pool_untouched() {
    let results = run(2, |rt| {
        let cap = rt.pool().capacity();
        let mine = alloc_everywhere(rt, 8)?;
        if rt.myid().0 == 1 {
            rt.put_blocking(mine, bytes_of(&[41i64]), 1, &long(), &long())?;
        }
        rt.barrier(TEAM_ALL)?;

        let mut got = [0i64];
        let mut handles = Vec::new();
        if rt.myid().0 == 0 {
            stall_all(rt);
            let h = unsafe {
                rt.get_handle(bytes_of_mut(&mut got), mine.with_unit(1), 1, &long(), &long())?
            };
            handles.push(h);
            for _ in 0..10 {
                assert!(!rt.test(&mut handles[0])?);
                assert!(!rt.test_local(&mut handles[0])?);
                assert!(!rt.testall(&mut handles)?);
                assert_eq!(rt.pool().free_count(), cap - 1);
            }
            resume_all(rt);
            assert!(rt.testall_local(&mut handles)?);
            assert!(handles[0].is_null());
            assert_eq!(rt.pool().free_count(), cap);
        }
        rt.barrier(TEAM_ALL)?;
        Ok(got[0])
    });
    assert_eq!(results[0], 41);
}

#[test]
fn test_waitall_and_free_drain_stalled_queues() {
    let results = run(2, |rt| {
        let cap = rt.pool().capacity();
        let mine = alloc_everywhere(rt, 32)?;
        let peer = right(rt, mine);
        let me = rt.myid().0 as i64;
        let vals = [me + 10, me + 20, me + 30, me + 40];

        stall_all(rt);
        let mut handles: Vec<Handle> = (0..3)
            .map(|i| unsafe {
                rt.put_handle(peer.add(8 * i as u64), bytes_of(&vals[i..i + 1]), 1, &long(), &long())
            })
            .collect::<pgas::Result<_>>()?;
        let mut last = unsafe { rt.put_handle(peer.add(24), bytes_of(&vals[3..]), 1, &long(), &long())? };
        assert_eq!(rt.pool().free_count(), cap - 4);

        rt.waitall(&mut handles)?;
        assert!(handles.iter().all(Handle::is_null));
        rt.handle_free(&mut last)?;
        assert!(last.is_null());
        assert_eq!(rt.pool().free_count(), cap);
        resume_all(rt);
        rt.barrier(TEAM_ALL)?;

        let mut got = [0i64; 4];
        rt.get_blocking(bytes_of_mut(&mut got), mine, 4, &long(), &long())?;
        Ok(got)
    });
    assert_eq!(results[0], [11, 21, 31, 41]);
    assert_eq!(results[1], [10, 20, 30, 40]);
}

#[test]
fn test_pool_exhaustion_is_reported() {
    let config = test_config().with_pool_size(2);
    let results = run_with(2, FabricConfig::default(), config, |rt| {
        let mine = alloc_everywhere(rt, 8)?;
        let peer = right(rt, mine);
        stall_all(rt);
        let mut bufs = [[0i64]; 3];
        let [a, b, c] = &mut bufs;
        let mut handles = vec![
            unsafe { rt.get_handle(bytes_of_mut(a), peer, 1, &long(), &long())? },
            unsafe { rt.get_handle(bytes_of_mut(b), peer, 1, &long(), &long())? },
        ];
        let third = unsafe { rt.get_handle(bytes_of_mut(c), peer, 1, &long(), &long()) };
        let kind = third.err().map(|e| e.kind());
        assert_eq!(rt.pool().free_count(), 0);
        rt.waitall(&mut handles)?;
        resume_all(rt);
        assert_eq!(rt.pool().free_count(), 2);
        rt.barrier(TEAM_ALL)?;
        Ok(kind)
    });
    assert!(results.iter().all(|k| *k == Some(ErrorKind::ResourceExhausted)));
}

#[test]
fn test_transfer_argument_errors() {
    let results = run(2, |rt| {
        let mine = rt.memalloc(8)?;
        let mut buf = [0u8; 8];
        let kinds = [
            rt.get_blocking(&mut buf, mine, 1, &int(), &long()).map_err(|e| e.kind()),
            rt.get_blocking(&mut buf, mine, 4, &int(), &int()).map_err(|e| e.kind()),
            rt.get_blocking(&mut buf, mine.with_unit(7), 1, &int(), &int()).map_err(|e| e.kind()),
            rt.get_blocking(&mut buf, GlobalPtr::new(0, SegmentId(9), 0), 1, &int(), &int())
                .map_err(|e| e.kind()),
            rt.put_blocking(mine.add(1024 * 1024), &buf, 1, &int(), &int()).map_err(|e| e.kind()),
            rt.memfree(mine.add(8)).map_err(|e| e.kind()),
        ];
        rt.memfree(mine)?;
        Ok(kinds)
    });
    use ErrorKind::*;
    for kinds in results {
        assert_eq!(
            kinds,
            [
                Err(InvalidArgument),
                Err(InvalidArgument),
                Err(InvalidArgument),
                Err(NotFound),
                Err(InvalidArgument),
                Err(InvalidArgument),
            ]
        );
    }
}

#[test]
fn test_finalize_flushes_outstanding_requests() {
    let data = [9i64; 2];
    let results = run(2, |rt| {
        let mine = alloc_everywhere(rt, 16)?;
        unsafe { rt.put(right(rt, mine), bytes_of(&data), 2, &long(), &long())? };
        Ok(rt.pending_requests())
    });
    assert_eq!(results, vec![1, 1]);
}
