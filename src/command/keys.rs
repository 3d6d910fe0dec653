use super::{
    arg_str, read_all_keys, read_first_key, to_cmd_line, write_all_keys, write_first_key,
    CmdFlag, Command,
};
use crate::persistence::marshal::make_expire_cmd;
use crate::resp::{CmdLine, Reply};
use crate::store::entity::now_millis;
use crate::store::single::Database;
use crate::store::undo::rollback_given_keys;
use std::collections::HashMap;

fn exec_del(db: &Database, args: &[Vec<u8>]) -> Reply {
    let mut deleted = 0;
    for arg in args {
        deleted += db.remove(&arg_str(arg));
    }
    if deleted > 0 {
        db.add_aof(to_cmd_line("del", args));
    }
    Reply::integer(deleted as i64)
}

fn exec_exists(db: &Database, args: &[Vec<u8>]) -> Reply {
    let mut found = 0;
    for arg in args {
        if db.get_entity(&arg_str(arg)).is_some() {
            found += 1;
        }
    }
    Reply::integer(found)
}

fn exec_expire(db: &Database, args: &[Vec<u8>]) -> Reply {
    let key = arg_str(&args[0]);
    let seconds: i64 = match arg_str(&args[1]).parse() {
        Ok(n) => n,
        Err(_) => return Reply::error("ERR value is not an integer or out of range"),
    };
    if db.get_entity(&key).is_none() {
        return Reply::integer(0);
    }
    if seconds <= 0 {
        db.remove(&key);
        db.add_aof(to_cmd_line("del", &args[..1]));
        return Reply::integer(1);
    }
    let expire_at = now_millis() + seconds as u64 * 1000;
    db.expire(&key, expire_at);
    db.add_aof(make_expire_cmd(&key, expire_at));
    Reply::integer(1)
}

fn exec_pexpireat(db: &Database, args: &[Vec<u8>]) -> Reply {
    let key = arg_str(&args[0]);
    let at_ms: u64 = match arg_str(&args[1]).parse() {
        Ok(n) => n,
        Err(_) => return Reply::error("ERR value is not an integer or out of range"),
    };
    if db.get_entity(&key).is_none() {
        return Reply::integer(0);
    }
    db.expire(&key, at_ms);
    db.add_aof(to_cmd_line("pexpireat", args));
    Reply::integer(1)
}

fn ttl_reply(db: &Database, args: &[Vec<u8>], unit_ms: u64) -> Reply {
    let key = arg_str(&args[0]);
    if db.get_entity(&key).is_none() {
        return Reply::integer(-2);
    }
    match db.expiration(&key) {
        None => Reply::integer(-1),
        Some(at) => {
            let now = now_millis();
            Reply::integer((at.saturating_sub(now) / unit_ms) as i64)
        }
    }
}

fn exec_ttl(db: &Database, args: &[Vec<u8>]) -> Reply {
    ttl_reply(db, args, 1000)
}

fn exec_pttl(db: &Database, args: &[Vec<u8>]) -> Reply {
    ttl_reply(db, args, 1)
}

fn exec_persist(db: &Database, args: &[Vec<u8>]) -> Reply {
    let key = arg_str(&args[0]);
    if db.get_entity(&key).is_none() || db.expiration(&key).is_none() {
        return Reply::integer(0);
    }
    db.persist(&key);
    db.add_aof(to_cmd_line("persist", args));
    Reply::integer(1)
}

fn exec_type(db: &Database, args: &[Vec<u8>]) -> Reply {
    let key = arg_str(&args[0]);
    match db.get_entity(&key) {
        Some(entity) => Reply::simple(entity.type_name()),
        None => Reply::simple("none"),
    }
}

fn undo_del(db: &Database, args: &[Vec<u8>]) -> Vec<CmdLine> {
    let keys: Vec<String> = args.iter().map(|arg| arg_str(arg)).collect();
    rollback_given_keys(db, &keys)
}

fn undo_expire(db: &Database, args: &[Vec<u8>]) -> Vec<CmdLine> {
    rollback_given_keys(db, &[arg_str(&args[0])])
}

pub(super) fn register(table: &mut HashMap<&'static str, Command>) {
    use super::register;
    register(table, "del", exec_del, Some(write_all_keys), Some(undo_del), -2, CmdFlag::Write);
    register(table, "exists", exec_exists, Some(read_all_keys), None, -2, CmdFlag::ReadOnly);
    register(table, "expire", exec_expire, Some(write_first_key), Some(undo_expire), 3, CmdFlag::Write);
    register(table, "pexpireat", exec_pexpireat, Some(write_first_key), Some(undo_expire), 3, CmdFlag::Write);
    register(table, "ttl", exec_ttl, Some(read_first_key), None, 2, CmdFlag::ReadOnly);
    register(table, "pttl", exec_pttl, Some(read_first_key), None, 2, CmdFlag::ReadOnly);
    register(table, "persist", exec_persist, Some(write_first_key), Some(undo_expire), 2, CmdFlag::Write);
    register(table, "type", exec_type, Some(read_first_key), None, 2, CmdFlag::ReadOnly);
}
