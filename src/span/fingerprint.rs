//! Span classification and group fingerprinting.
//!
//! Every span gets a coarse `system` tag and a 64-bit `group_id` collapsing
//! semantically similar spans, so dashboards can aggregate by either.

use std::hash::Hasher;

use sqlparser::dialect::GenericDialect;
use sqlparser::tokenizer::{Token, Tokenizer};
use twox_hash::XxHash64;

use super::{Span, SpanKind};
use crate::attrs;

pub const INTERNAL_SYSTEM: &str = "internal";

const RPC_TYPE: &str = "rpc";
const MESSAGING_TYPE: &str = "messaging";
const DB_TYPE: &str = "db";
const HTTP_TYPE: &str = "http";
const SERVICE_TYPE: &str = "service";

const SQL_KEYWORDS: [&str; 17] = [
    "SELECT", "INSERT", "UPDATE", "DELETE", "CREATE", "DROP", "TRUNCATE", "WITH", "FROM", "TABLE",
    "JOIN", "UNION", "WHERE", "GROUP", "LIMIT", "ORDER", "HAVING",
];

/// Assigns `system` and `group_id`, rewriting `name` for DB statements.
///
/// The digest covers the kind and the name as received; a DB statement
/// rewrite only changes the display name, so statements differing in
/// literals still land in one group.
pub fn assign_system_and_group(span: &mut Span) {
    let mut digest = XxHash64::with_seed(0);
    digest.write(span.kind.as_str().as_bytes());
    digest.write(span.name.as_bytes());
    assign_system(span, &mut digest);
    span.group_id = digest.finish();
}

/// Priority cascade: rpc, messaging, db, http, service, internal.
fn assign_system(span: &mut Span, digest: &mut XxHash64) {
    if !span.attrs.text(attrs::RPC_SYSTEM).is_empty() {
        span.system = format!("{RPC_TYPE}:{}", span.attrs.service_name());
        digest.write(span.system.as_bytes());
        return;
    }

    let messaging = span.attrs.text(attrs::MESSAGING_SYSTEM);
    if !messaging.is_empty() {
        span.system = format!("{MESSAGING_TYPE}:{messaging}");
        digest.write(span.system.as_bytes());
        return;
    }

    let db = span.attrs.text(attrs::DB_SYSTEM);
    if !db.is_empty() {
        span.system = format!("{DB_TYPE}:{db}");
        digest.write(span.system.as_bytes());

        let table = span.attrs.text(attrs::DB_SQL_TABLE);
        if !table.is_empty() {
            digest.write(table.as_bytes());
        }
        let statement = span.attrs.text(attrs::DB_STATEMENT);
        if !statement.is_empty() {
            hash_sql_keywords(digest, statement);
            span.name = statement.to_string();
        }
        return;
    }

    if span.attrs.has(attrs::HTTP_ROUTE) || span.attrs.has(attrs::HTTP_TARGET) {
        span.system = format!("{HTTP_TYPE}:{}", span.attrs.service_name());
        digest.write(span.system.as_bytes());
        return;
    }

    if span.parent_id == 0 || span.kind != SpanKind::Internal {
        span.system = format!("{SERVICE_TYPE}:{}", span.attrs.service_name());
        digest.write(span.system.as_bytes());
        return;
    }

    span.system = INTERNAL_SYSTEM.to_string();
    digest.write(span.system.as_bytes());
}

/// Mixes only the fixed SQL keyword tokens into the digest. Literals,
/// identifiers, and whitespace are discarded so statements differing in
/// values collapse.
fn hash_sql_keywords(digest: &mut XxHash64, statement: &str) {
    let dialect = GenericDialect {};
    let tokens = match Tokenizer::new(&dialect, statement).tokenize() {
        Ok(tokens) => tokens,
        Err(_) => return,
    };

    for token in tokens {
        if let Token::Word(word) = token {
            if is_sql_keyword(&word.value) {
                digest.write(word.value.as_bytes());
            }
        }
    }
}

fn is_sql_keyword(word: &str) -> bool {
    SQL_KEYWORDS.iter().any(|kw| kw.eq_ignore_ascii_case(word))
}
