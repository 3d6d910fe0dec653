pub mod keys;
pub mod ping;
pub mod sorted_set;
pub mod string;

use crate::resp::{CmdLine, Reply};
use crate::store::single::Database;
use once_cell::sync::Lazy;
use std::collections::HashMap;

/// Runs the command against a database. Arguments exclude the command name.
pub type ExecFn = fn(&Database, &[Vec<u8>]) -> Reply;
/// Extracts `(write_keys, read_keys)` from the arguments, before locking.
pub type PrepareFn = fn(&[Vec<u8>]) -> (Vec<String>, Vec<String>);
/// Builds the compensating command lines that undo this command, evaluated
/// against the pre-image while the keys are locked.
pub type UndoFn = fn(&Database, &[Vec<u8>]) -> Vec<CmdLine>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmdFlag {
    Write,
    ReadOnly,
}

pub struct Command {
    pub name: &'static str,
    pub executor: ExecFn,
    pub prepare: Option<PrepareFn>,
    pub undo: Option<UndoFn>,
    /// Expected token count including the command name; negative means
    /// "at least `-arity`".
    pub arity: i32,
    pub flags: CmdFlag,
}

type Table = HashMap<&'static str, Command>;

fn register(
    table: &mut Table,
    name: &'static str,
    executor: ExecFn,
    prepare: Option<PrepareFn>,
    undo: Option<UndoFn>,
    arity: i32,
    flags: CmdFlag,
) {
    table.insert(
        name,
        Command {
            name,
            executor,
            prepare,
            undo,
            arity,
            flags,
        },
    );
}

/// The command registry: lowercase name to descriptor.
pub static CMD_TABLE: Lazy<Table> = Lazy::new(|| {
    let mut table = Table::new();
    ping::register(&mut table);
    string::register(&mut table);
    keys::register(&mut table);
    sorted_set::register(&mut table);
    table
});

pub fn lookup(name: &str) -> Option<&'static Command> {
    CMD_TABLE.get(name)
}

pub fn validate_arity(arity: i32, line_len: usize) -> bool {
    let len = line_len as i32;
    if arity >= 0 {
        len == arity
    } else {
        len >= -arity
    }
}

/// Write/read key sets for a command line, used by the striped lock path
/// and by the cluster router. Unknown or arity-invalid commands touch no
/// keys, so dispatch can reject them.
pub fn related_keys(cmdline: &[Vec<u8>]) -> (Vec<String>, Vec<String>) {
    if cmdline.is_empty() {
        return (Vec::new(), Vec::new());
    }
    let name = String::from_utf8_lossy(&cmdline[0]).to_lowercase();
    let cmd = match lookup(&name) {
        Some(cmd) if validate_arity(cmd.arity, cmdline.len()) => cmd,
        _ => return (Vec::new(), Vec::new()),
    };
    match cmd.prepare {
        Some(prepare) => prepare(&cmdline[1..]),
        None => (Vec::new(), Vec::new()),
    }
}

/* ---- shared argument and reply helpers ---- */

pub fn arg_str(arg: &[u8]) -> String {
    String::from_utf8_lossy(arg).into_owned()
}

/// `name + args` as a command line, the form handed to the AOF.
pub fn to_cmd_line(name: &str, args: &[Vec<u8>]) -> CmdLine {
    let mut line = Vec::with_capacity(args.len() + 1);
    line.push(name.as_bytes().to_vec());
    line.extend(args.iter().cloned());
    line
}

pub fn wrong_arg_count(name: &str) -> Reply {
    Reply::error(format!(
        "ERR wrong number of arguments for '{name}' command"
    ))
}

pub fn wrong_type() -> Reply {
    Reply::error("WRONGTYPE Operation against a key holding the wrong kind of value")
}

pub fn syntax_error() -> Reply {
    Reply::error("ERR syntax error")
}

/* ---- common prepare functions ---- */

pub fn write_first_key(args: &[Vec<u8>]) -> (Vec<String>, Vec<String>) {
    (vec![arg_str(&args[0])], Vec::new())
}

pub fn read_first_key(args: &[Vec<u8>]) -> (Vec<String>, Vec<String>) {
    (Vec::new(), vec![arg_str(&args[0])])
}

pub fn write_all_keys(args: &[Vec<u8>]) -> (Vec<String>, Vec<String>) {
    (args.iter().map(|arg| arg_str(arg)).collect(), Vec::new())
}

pub fn read_all_keys(args: &[Vec<u8>]) -> (Vec<String>, Vec<String>) {
    (Vec::new(), args.iter().map(|arg| arg_str(arg)).collect())
}

/// Write keys for `k1 v1 k2 v2 ...` shaped argument lists.
pub fn prepare_mset(args: &[Vec<u8>]) -> (Vec<String>, Vec<String>) {
    let keys = args
        .chunks(2)
        .filter(|pair| pair.len() == 2)
        .map(|pair| arg_str(&pair[0]))
        .collect();
    (keys, Vec::new())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arity_validation() {
        assert!(validate_arity(2, 2));
        assert!(!validate_arity(2, 3));
        assert!(validate_arity(-3, 3));
        assert!(validate_arity(-3, 7));
        assert!(!validate_arity(-3, 2));
    }

    #[test]
    fn table_contains_the_wire_surface() {
        for name in [
            "ping", "set", "setnx", "setex", "psetex", "mset", "msetnx", "get", "mget", "del",
            "exists", "expire", "pexpireat", "ttl", "pttl", "persist", "type", "zadd", "zscore",
            "zcard", "zrank", "zrevrank", "zrange", "zrangebyscore", "zcount", "zrem",
            "zremrangebyrank",
        ] {
            assert!(lookup(name).is_some(), "missing command {name}");
        }
        assert!(lookup("subscribe").is_none());
    }

    #[test]
    fn related_keys_split_writes_and_reads() {
        let line = to_cmd_line("mset", &[b"k1".to_vec(), b"v1".to_vec(), b"k2".to_vec(), b"v2".to_vec()]);
        let (write, read) = related_keys(&line);
        assert_eq!(write, vec!["k1".to_string(), "k2".to_string()]);
        assert!(read.is_empty());

        let line = to_cmd_line("mget", &[b"k1".to_vec(), b"k2".to_vec()]);
        let (write, read) = related_keys(&line);
        assert!(write.is_empty());
        assert_eq!(read, vec!["k1".to_string(), "k2".to_string()]);
    }
}
