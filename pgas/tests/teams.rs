//! Team management and team-allocated global memory.

mod common;

use common::{int, long, run};
use pgas::{
    BasicType, DataType, ErrorKind, GlobalUnit, ReduceOp, TEAM_ALL, TeamUnit, bytes_of,
    bytes_of_mut,
};

#[test]
fn test_team_create_subset() {
    let members = [GlobalUnit(1), GlobalUnit(3), GlobalUnit(4)];
    let results = run(5, |rt| {
        let Some(team) = rt.team_create(TEAM_ALL, &members)? else {
            return Ok(None);
        };
        let myid = rt.team_myid(team)?;
        assert_eq!(rt.team_size(team)?, 3);
        assert_eq!(rt.team_unit_l2g(team, myid)?, rt.myid());
        assert_eq!(rt.team_unit_g2l(team, GlobalUnit(4))?, TeamUnit(2));
        assert_eq!(
            rt.team_unit_g2l(team, GlobalUnit(0)).unwrap_err().kind(),
            ErrorKind::NotFound
        );

        // Broadcast from the team's last unit, global unit 4.
        let mut value = [if rt.myid().0 == 4 { 77i32 } else { 0 }];
        rt.bcast(bytes_of_mut(&mut value), 1, &int(), TeamUnit(2), team)?;

        let mut sum = [0i32];
        rt.allreduce(bytes_of(&[rt.myid().0 as i32]), bytes_of_mut(&mut sum), 1, &int(), ReduceOp::Sum, team)?;
        rt.team_destroy(team)?;
        assert_eq!(rt.team_size(team).unwrap_err().kind(), ErrorKind::NotFound);
        Ok(Some((team, myid, value[0], sum[0])))
    });
    assert_eq!(results[0], None);
    assert_eq!(results[2], None);
    let team = results[1].map(|r| r.0);
    for (i, unit) in [1usize, 3, 4].into_iter().enumerate() {
        let (t, myid, value, sum) = results[unit].unwrap();
        assert_eq!(Some(t), team);
        assert_eq!(myid, TeamUnit(i as u32));
        assert_eq!(value, 77);
        assert_eq!(sum, 8);
    }
}

#[test]
fn test_team_all_is_permanent() {
    let results = run(2, |rt| {
        assert_eq!(rt.team_size(TEAM_ALL)?, 2);
        assert_eq!(rt.team_myid(TEAM_ALL)?.0, rt.myid().0);
        Ok(rt.team_destroy(TEAM_ALL).map_err(|e| e.kind()))
    });
    assert!(results.iter().all(|r| *r == Err(ErrorKind::InvalidArgument)));
}

#[test]
fn test_successive_teams_get_fresh_ids() {
    let results = run(3, |rt| {
        let a = rt.team_create(TEAM_ALL, &[GlobalUnit(0), GlobalUnit(1)])?;
        let b = rt.team_create(TEAM_ALL, &[GlobalUnit(1), GlobalUnit(2)])?;
        Ok((a, b))
    });
    let (a, b) = results[1];
    assert!(a.is_some() && b.is_some());
    assert_ne!(a, b);
    assert_eq!(results[0].0, a);
    assert_eq!(results[2].1, b);
}

#[test]
fn test_sibling_teams_split_again() {
    let results = run(4, |rt| {
        let me = rt.myid().0;
        let low = rt.team_create(TEAM_ALL, &[GlobalUnit(0), GlobalUnit(1)])?;
        let high = rt.team_create(TEAM_ALL, &[GlobalUnit(2), GlobalUnit(3)])?;
        let parent = low.or(high).expect("every unit is in one half");
        let pair = [GlobalUnit(me & !1), GlobalUnit(me | 1)];
        let child = rt.team_create(parent, &pair)?.expect("the pair is the whole parent");

        let mut sum = [0i32];
        rt.allreduce(
            bytes_of(&[me as i32]),
            bytes_of_mut(&mut sum),
            1,
            &int(),
            ReduceOp::Sum,
            child,
        )?;
        rt.barrier(child)?;
        rt.team_destroy(child)?;
        rt.team_destroy(parent)?;
        Ok((parent, child, sum[0]))
    });
    // Both halves pick the same child id, each with its own group.
    assert_eq!(results[0].1, results[2].1);
    assert_ne!(results[0].0, results[2].0);
    assert_eq!(results.iter().map(|r| r.2).collect::<Vec<_>>(), vec![1, 1, 5, 5]);
}

#[test]
fn test_team_memalloc_ring() {
    let results = run(4, |rt| {
        let cap = rt.pool().capacity();
        let team = rt
            .team_create(TEAM_ALL, &[GlobalUnit(0), GlobalUnit(2), GlobalUnit(3)])?;
        let Some(team) = team else {
            return Ok(None);
        };
        let size = rt.team_size(team)? as u32;
        let me = rt.team_myid(team)?.0;
        let base = rt.team_memalloc(team, 16)?;
        assert_eq!(rt.pool().free_count(), cap - 1);

        let right = base.with_unit((me + 1) % size).add(8);
        rt.put_blocking(right, bytes_of(&[i64::from(me) * 3]), 1, &long(), &long())?;
        rt.barrier(team)?;

        let mut got = [0i64];
        rt.get_blocking(bytes_of_mut(&mut got), base.with_unit(me).add(8), 1, &long(), &long())?;
        let left = (me + size - 1) % size;
        assert_eq!(got[0], i64::from(left) * 3);

        let out_of_range = rt
            .get_blocking(bytes_of_mut(&mut got), base.with_unit(me).add(16), 1, &long(), &long())
            .unwrap_err()
            .kind();
        let bad_unit = rt
            .get_blocking(bytes_of_mut(&mut got), base.with_unit(size), 1, &long(), &long())
            .unwrap_err()
            .kind();

        rt.team_memfree(base)?;
        assert_eq!(rt.pool().free_count(), cap);
        let freed = rt
            .get_blocking(bytes_of_mut(&mut got), base, 1, &long(), &long())
            .unwrap_err()
            .kind();
        Ok(Some([out_of_range, bad_unit, freed]))
    });
    assert_eq!(results[1], None);
    for r in [&results[0], &results[2], &results[3]] {
        assert_eq!(
            *r,
            Some([
                ErrorKind::InvalidArgument,
                ErrorKind::InvalidArgument,
                ErrorKind::NotFound
            ])
        );
    }
}

#[test]
fn test_team_memalloc_left_for_finalize() {
    let results = run(2, |rt| {
        let gptr = rt.team_memalloc(TEAM_ALL, 64)?;
        let word = DataType::Basic(BasicType::ULong);
        rt.put_blocking(gptr.with_unit(1), bytes_of(&[5u64]), 1, &word, &word)?;
        Ok(gptr.segid)
    });
    assert_eq!(results[0], results[1]);
}
