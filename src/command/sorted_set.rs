use super::{
    arg_str, read_first_key, syntax_error, to_cmd_line, wrong_type, write_first_key, CmdFlag,
    Command,
};
use crate::resp::{CmdLine, Reply};
use crate::store::entity::DataEntity;
use crate::store::single::Database;
use crate::store::undo::rollback_zset_fields;
use crate::types::border::ScoreBorder;
use crate::types::skiplist::Element;
use crate::types::sorted_set::SortedSet;
use bytes::Bytes;
use std::collections::HashMap;

/// Redis renders integral scores without a fractional part.
pub fn format_score(score: f64) -> String {
    format!("{score}")
}

fn with_zset<R>(db: &Database, key: &str, f: impl FnOnce(&SortedSet) -> R) -> Result<Option<R>, Reply> {
    match db.with_entity(key, |entity| match entity {
        DataEntity::SortedSet(set) => Ok(f(set)),
        _ => Err(()),
    }) {
        Some(Ok(result)) => Ok(Some(result)),
        Some(Err(())) => Err(wrong_type()),
        None => Ok(None),
    }
}

/// Mutate the sorted set at `key`, creating it when absent. The caller holds
/// the key's stripe write lock, so the check-then-create pair is atomic with
/// respect to this key.
fn with_zset_mut<R>(
    db: &Database,
    key: &str,
    f: impl FnOnce(&mut SortedSet) -> R,
) -> Result<R, Reply> {
    let attempt = db.with_entity_mut(key, |entity| match entity {
        DataEntity::SortedSet(_) => Ok(()),
        _ => Err(()),
    });
    match attempt {
        Some(Err(())) => return Err(wrong_type()),
        None => {
            db.put_entity(key, DataEntity::SortedSet(SortedSet::new()));
        }
        Some(Ok(())) => {}
    }
    let result = db.with_entity_mut(key, |entity| match entity {
        DataEntity::SortedSet(set) => Ok(f(set)),
        _ => Err(()),
    });
    match result {
        Some(Ok(result)) => Ok(result),
        _ => Err(wrong_type()),
    }
}

fn parse_score(raw: &[u8]) -> Result<f64, Reply> {
    std::str::from_utf8(raw)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| Reply::error("ERR value is not a valid float"))
}

fn parse_int(raw: &[u8]) -> Result<i64, Reply> {
    std::str::from_utf8(raw)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| Reply::error("ERR value is not an integer or out of range"))
}

fn parse_border(raw: &[u8]) -> Result<ScoreBorder, Reply> {
    ScoreBorder::parse(raw).map_err(|_| Reply::error("ERR min or max is not a float"))
}

/// `[start, end)` window for a rank query over `len` elements, after Redis
/// negative-index normalization. `None` means the window is empty.
fn rank_window(start: i64, stop: i64, len: u64) -> Option<(u64, u64)> {
    let len = len as i64;
    let start = if start < 0 { (len + start).max(0) } else { start };
    let stop = if stop < 0 { len + stop } else { stop };
    if start >= len || stop < start {
        return None;
    }
    let end = (stop + 1).min(len);
    Some((start as u64, end as u64))
}

fn elements_reply(elements: Vec<Element>, with_scores: bool) -> Reply {
    let mut items = Vec::with_capacity(elements.len() * if with_scores { 2 } else { 1 });
    for element in elements {
        items.push(Reply::bulk(Bytes::from(element.member)));
        if with_scores {
            items.push(Reply::bulk(Bytes::from(format_score(element.score))));
        }
    }
    Reply::array(items)
}

fn exec_zadd(db: &Database, args: &[Vec<u8>]) -> Reply {
    if args.len() % 2 != 1 {
        return syntax_error();
    }
    let key = arg_str(&args[0]);

    let mut pairs = Vec::with_capacity(args.len() / 2);
    for chunk in args[1..].chunks(2) {
        let score = match parse_score(&chunk[0]) {
            Ok(score) => score,
            Err(err) => return err,
        };
        pairs.push((score, arg_str(&chunk[1])));
    }

    let added = match with_zset_mut(db, &key, |set| {
        let mut added = 0;
        for (score, member) in &pairs {
            if set.add(member, *score) {
                added += 1;
            }
        }
        added
    }) {
        Ok(added) => added,
        Err(err) => return err,
    };

    db.add_aof(to_cmd_line("zadd", args));
    Reply::integer(added)
}

fn exec_zscore(db: &Database, args: &[Vec<u8>]) -> Reply {
    let key = arg_str(&args[0]);
    let member = arg_str(&args[1]);
    match with_zset(db, &key, |set| set.score(&member)) {
        Ok(Some(Some(score))) => Reply::bulk(Bytes::from(format_score(score))),
        Ok(_) => Reply::null_bulk(),
        Err(err) => err,
    }
}

fn exec_zcard(db: &Database, args: &[Vec<u8>]) -> Reply {
    let key = arg_str(&args[0]);
    match with_zset(db, &key, |set| set.len()) {
        Ok(Some(len)) => Reply::integer(len as i64),
        Ok(None) => Reply::integer(0),
        Err(err) => err,
    }
}

fn zrank_reply(db: &Database, args: &[Vec<u8>], desc: bool) -> Reply {
    let key = arg_str(&args[0]);
    let member = arg_str(&args[1]);
    match with_zset(db, &key, |set| set.rank(&member, desc)) {
        Ok(Some(Some(rank))) => Reply::integer(rank as i64),
        Ok(_) => Reply::null_bulk(),
        Err(err) => err,
    }
}

fn exec_zrank(db: &Database, args: &[Vec<u8>]) -> Reply {
    zrank_reply(db, args, false)
}

fn exec_zrevrank(db: &Database, args: &[Vec<u8>]) -> Reply {
    zrank_reply(db, args, true)
}

fn exec_zrange(db: &Database, args: &[Vec<u8>]) -> Reply {
    let with_scores = match args.get(3) {
        None => false,
        Some(opt) if opt.eq_ignore_ascii_case(b"withscores") && args.len() == 4 => true,
        Some(_) => return syntax_error(),
    };
    let key = arg_str(&args[0]);
    let start = match parse_int(&args[1]) {
        Ok(n) => n,
        Err(err) => return err,
    };
    let stop = match parse_int(&args[2]) {
        Ok(n) => n,
        Err(err) => return err,
    };

    let elements = match with_zset(db, &key, |set| match rank_window(start, stop, set.len()) {
        Some((start, end)) => set.range(start, end, false),
        None => Vec::new(),
    }) {
        Ok(Some(elements)) => elements,
        Ok(None) => Vec::new(),
        Err(err) => return err,
    };
    elements_reply(elements, with_scores)
}

fn exec_zrangebyscore(db: &Database, args: &[Vec<u8>]) -> Reply {
    let key = arg_str(&args[0]);
    let min = match parse_border(&args[1]) {
        Ok(border) => border,
        Err(err) => return err,
    };
    let max = match parse_border(&args[2]) {
        Ok(border) => border,
        Err(err) => return err,
    };

    let mut with_scores = false;
    let mut offset: u64 = 0;
    let mut limit: i64 = -1;
    let mut i = 3;
    while i < args.len() {
        if args[i].eq_ignore_ascii_case(b"withscores") {
            with_scores = true;
            i += 1;
        } else if args[i].eq_ignore_ascii_case(b"limit") {
            if i + 2 >= args.len() {
                return syntax_error();
            }
            offset = match parse_int(&args[i + 1]) {
                Ok(n) if n >= 0 => n as u64,
                Ok(_) => return syntax_error(),
                Err(err) => return err,
            };
            limit = match parse_int(&args[i + 2]) {
                Ok(n) => n,
                Err(err) => return err,
            };
            i += 3;
        } else {
            return syntax_error();
        }
    }

    let elements = match with_zset(db, &key, |set| {
        set.range_by_score(&min, &max, offset, limit, false)
    }) {
        Ok(Some(elements)) => elements,
        Ok(None) => Vec::new(),
        Err(err) => return err,
    };
    elements_reply(elements, with_scores)
}

fn exec_zcount(db: &Database, args: &[Vec<u8>]) -> Reply {
    let key = arg_str(&args[0]);
    let min = match parse_border(&args[1]) {
        Ok(border) => border,
        Err(err) => return err,
    };
    let max = match parse_border(&args[2]) {
        Ok(border) => border,
        Err(err) => return err,
    };
    match with_zset(db, &key, |set| set.count(&min, &max)) {
        Ok(Some(count)) => Reply::integer(count as i64),
        Ok(None) => Reply::integer(0),
        Err(err) => err,
    }
}

fn exec_zrem(db: &Database, args: &[Vec<u8>]) -> Reply {
    let key = arg_str(&args[0]);
    let members: Vec<String> = args[1..].iter().map(|arg| arg_str(arg)).collect();

    let removed = match with_zset(db, &key, |_| ()) {
        Ok(None) => 0,
        Err(err) => return err,
        Ok(Some(())) => {
            match db.with_entity_mut(&key, |entity| match entity {
                DataEntity::SortedSet(set) => {
                    members.iter().filter(|member| set.remove(member.as_str())).count()
                }
                _ => 0,
            }) {
                Some(count) => count,
                None => 0,
            }
        }
    };

    if removed > 0 {
        db.add_aof(to_cmd_line("zrem", args));
    }
    Reply::integer(removed as i64)
}

fn exec_zremrangebyrank(db: &Database, args: &[Vec<u8>]) -> Reply {
    let key = arg_str(&args[0]);
    let start = match parse_int(&args[1]) {
        Ok(n) => n,
        Err(err) => return err,
    };
    let stop = match parse_int(&args[2]) {
        Ok(n) => n,
        Err(err) => return err,
    };

    let removed = match with_zset(db, &key, |set| set.len()) {
        Ok(None) => 0,
        Err(err) => return err,
        Ok(Some(len)) => match rank_window(start, stop, len) {
            None => 0,
            Some((start, end)) => db
                .with_entity_mut(&key, |entity| match entity {
                    DataEntity::SortedSet(set) => set.remove_range_by_rank(start, end),
                    _ => 0,
                })
                .unwrap_or(0),
        },
    };

    if removed > 0 {
        db.add_aof(to_cmd_line("zremrangebyrank", args));
    }
    Reply::integer(removed as i64)
}

fn undo_zadd(db: &Database, args: &[Vec<u8>]) -> Vec<CmdLine> {
    let key = arg_str(&args[0]);
    let members: Vec<String> = args[1..]
        .chunks(2)
        .filter(|chunk| chunk.len() == 2)
        .map(|chunk| arg_str(&chunk[1]))
        .collect();
    rollback_zset_fields(db, &key, &members)
}

fn undo_zrem(db: &Database, args: &[Vec<u8>]) -> Vec<CmdLine> {
    let key = arg_str(&args[0]);
    let members: Vec<String> = args[1..].iter().map(|arg| arg_str(arg)).collect();
    rollback_zset_fields(db, &key, &members)
}

pub(super) fn register(table: &mut HashMap<&'static str, Command>) {
    use super::register;
    register(table, "zadd", exec_zadd, Some(write_first_key), Some(undo_zadd), -4, CmdFlag::Write);
    register(table, "zscore", exec_zscore, Some(read_first_key), None, 3, CmdFlag::ReadOnly);
    register(table, "zcard", exec_zcard, Some(read_first_key), None, 2, CmdFlag::ReadOnly);
    register(table, "zrank", exec_zrank, Some(read_first_key), None, 3, CmdFlag::ReadOnly);
    register(table, "zrevrank", exec_zrevrank, Some(read_first_key), None, 3, CmdFlag::ReadOnly);
    register(table, "zrange", exec_zrange, Some(read_first_key), None, -4, CmdFlag::ReadOnly);
    register(table, "zrangebyscore", exec_zrangebyscore, Some(read_first_key), None, -4, CmdFlag::ReadOnly);
    register(table, "zcount", exec_zcount, Some(read_first_key), None, 4, CmdFlag::ReadOnly);
    register(table, "zrem", exec_zrem, Some(write_first_key), Some(undo_zrem), -3, CmdFlag::Write);
    register(table, "zremrangebyrank", exec_zremrangebyrank, Some(write_first_key), None, 4, CmdFlag::Write);
}
