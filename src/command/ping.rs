use super::{wrong_arg_count, CmdFlag, Command};
use crate::resp::Reply;
use crate::store::single::Database;
use bytes::Bytes;
use std::collections::HashMap;

fn exec_ping(_db: &Database, args: &[Vec<u8>]) -> Reply {
    match args {
        [] => Reply::simple("PONG"),
        [msg] => Reply::bulk(Bytes::copy_from_slice(msg)),
        _ => wrong_arg_count("ping"),
    }
}

pub(super) fn register(table: &mut HashMap<&'static str, Command>) {
    super::register(table, "ping", exec_ping, None, None, -1, CmdFlag::ReadOnly);
}
