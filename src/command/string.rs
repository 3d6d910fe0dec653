use super::{
    arg_str, prepare_mset, read_all_keys, read_first_key, syntax_error, to_cmd_line,
    wrong_type, write_first_key, CmdFlag, Command,
};
use crate::resp::{CmdLine, Reply};
use crate::store::entity::{now_millis, DataEntity};
use crate::store::single::Database;
use crate::store::undo::rollback_given_keys;
use crate::persistence::marshal::make_expire_cmd;
use bytes::Bytes;
use std::collections::HashMap;

/// Read a key as a byte string; a key of another type is a WRONGTYPE error.
fn get_as_bytes(db: &Database, key: &str) -> Result<Option<Bytes>, Reply> {
    match db.get_entity(key) {
        None => Ok(None),
        Some(DataEntity::Bytes(data)) => Ok(Some(data)),
        Some(_) => Err(wrong_type()),
    }
}

fn exec_set(db: &Database, args: &[Vec<u8>]) -> Reply {
    if args.len() != 2 {
        return syntax_error();
    }
    let key = arg_str(&args[0]);
    db.put_entity(&key, DataEntity::Bytes(Bytes::copy_from_slice(&args[1])));
    // A plain SET discards any previous expiration.
    db.persist(&key);
    db.add_aof(to_cmd_line("set", args));
    Reply::ok()
}

fn exec_setnx(db: &Database, args: &[Vec<u8>]) -> Reply {
    let key = arg_str(&args[0]);
    let inserted = db.put_if_absent(&key, DataEntity::Bytes(Bytes::copy_from_slice(&args[1])));
    if inserted > 0 {
        db.add_aof(to_cmd_line("setnx", args));
    }
    Reply::integer(inserted as i64)
}

fn exec_setex(db: &Database, args: &[Vec<u8>]) -> Reply {
    set_with_ttl(db, args, "setex", 1000)
}

fn exec_psetex(db: &Database, args: &[Vec<u8>]) -> Reply {
    set_with_ttl(db, args, "psetex", 1)
}

/// Shared body of SETEX/PSETEX: `key ttl value` with the ttl scaled to
/// milliseconds by `unit_ms`.
fn set_with_ttl(db: &Database, args: &[Vec<u8>], name: &str, unit_ms: i64) -> Reply {
    let key = arg_str(&args[0]);
    let ttl: i64 = match arg_str(&args[1]).parse() {
        Ok(n) => n,
        Err(_) => return syntax_error(),
    };
    if ttl <= 0 {
        return Reply::error("ERR invalid expire time in setex");
    }

    db.put_entity(&key, DataEntity::Bytes(Bytes::copy_from_slice(&args[2])));
    let expire_at = now_millis() + (ttl * unit_ms) as u64;
    db.expire(&key, expire_at);

    db.add_aof(to_cmd_line(name, args));
    // Replay must restore the absolute deadline, not re-count the ttl.
    db.add_aof(make_expire_cmd(&key, expire_at));
    Reply::ok()
}

fn exec_mset(db: &Database, args: &[Vec<u8>]) -> Reply {
    if args.len() % 2 != 0 {
        return syntax_error();
    }
    for pair in args.chunks(2) {
        let key = arg_str(&pair[0]);
        db.put_entity(&key, DataEntity::Bytes(Bytes::copy_from_slice(&pair[1])));
    }
    db.add_aof(to_cmd_line("mset", args));
    Reply::ok()
}

fn exec_msetnx(db: &Database, args: &[Vec<u8>]) -> Reply {
    if args.len() % 2 != 0 {
        return syntax_error();
    }
    let keys: Vec<String> = args.chunks(2).map(|pair| arg_str(&pair[0])).collect();
    for key in &keys {
        if db.get_entity(key).is_some() {
            return Reply::integer(0);
        }
    }
    for pair in args.chunks(2) {
        let key = arg_str(&pair[0]);
        db.put_entity(&key, DataEntity::Bytes(Bytes::copy_from_slice(&pair[1])));
    }
    db.add_aof(to_cmd_line("msetnx", args));
    Reply::integer(1)
}

fn exec_get(db: &Database, args: &[Vec<u8>]) -> Reply {
    let key = arg_str(&args[0]);
    match get_as_bytes(db, &key) {
        Ok(Some(value)) => Reply::bulk(value),
        Ok(None) => Reply::null_bulk(),
        Err(err) => err,
    }
}

fn exec_mget(db: &Database, args: &[Vec<u8>]) -> Reply {
    let mut result = Vec::with_capacity(args.len());
    for arg in args {
        let key = arg_str(arg);
        match get_as_bytes(db, &key) {
            Ok(Some(value)) => result.push(Reply::bulk(value)),
            // A key of another type reads as absent here.
            Ok(None) | Err(_) => result.push(Reply::null_bulk()),
        }
    }
    Reply::array(result)
}

fn undo_first_key(db: &Database, args: &[Vec<u8>]) -> Vec<CmdLine> {
    rollback_given_keys(db, &[arg_str(&args[0])])
}

fn undo_mset(db: &Database, args: &[Vec<u8>]) -> Vec<CmdLine> {
    let (write_keys, _) = prepare_mset(args);
    rollback_given_keys(db, &write_keys)
}

pub(super) fn register(table: &mut HashMap<&'static str, Command>) {
    use super::register;
    register(table, "set", exec_set, Some(write_first_key), Some(undo_first_key), -3, CmdFlag::Write);
    register(table, "setnx", exec_setnx, Some(write_first_key), Some(undo_first_key), 3, CmdFlag::Write);
    register(table, "setex", exec_setex, Some(write_first_key), Some(undo_first_key), 4, CmdFlag::Write);
    register(table, "psetex", exec_psetex, Some(write_first_key), Some(undo_first_key), 4, CmdFlag::Write);
    register(table, "mset", exec_mset, Some(prepare_mset), Some(undo_mset), -3, CmdFlag::Write);
    register(table, "msetnx", exec_msetnx, Some(prepare_mset), Some(undo_mset), -3, CmdFlag::Write);
    register(table, "get", exec_get, Some(read_first_key), None, 2, CmdFlag::ReadOnly);
    register(table, "mget", exec_mget, Some(read_all_keys), None, -2, CmdFlag::ReadOnly);
}
