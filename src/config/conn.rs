// src/config/conn.rs
// Connection string parsing for key-value backends
//
// Format: addr1;addr2,poolSize,password,dbNum[,masterName]

use crate::error::{SessionError, SessionResult};

pub const DEFAULT_POOL_SIZE: usize = 100;
pub const DEFAULT_MASTER_NAME: &str = "mymaster";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KvConnSpec {
    pub addrs: Vec<String>,
    pub pool_size: usize,
    pub password: Option<String>,
    pub db: i64,
    pub master_name: String,
}

impl KvConnSpec {
    /// Only the address list is required; the other fields fall back to
    /// defaults when missing or unparseable.
    pub fn parse(spec: &str) -> SessionResult<Self> {
        let mut fields = spec.split(',');

        let addrs = parse_addrs(fields.next().unwrap_or(""))?;

        let pool_size = fields
            .next()
            .and_then(|s| s.trim().parse::<usize>().ok())
            .filter(|n| *n > 0)
            .unwrap_or(DEFAULT_POOL_SIZE);

        let password = fields
            .next()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());

        let db = fields
            .next()
            .and_then(|s| s.trim().parse::<i64>().ok())
            .filter(|n| *n >= 0)
            .unwrap_or(0);

        let master_name = fields
            .next()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| DEFAULT_MASTER_NAME.to_string());

        Ok(Self {
            addrs,
            pool_size,
            password,
            db,
            master_name,
        })
    }

    /// `redis://[:password@]host:port[/db]` for each address
    pub fn redis_urls(&self, with_db: bool) -> Vec<String> {
        let auth = match &self.password {
            Some(pw) => format!(":{}@", pw),
            None => String::new(),
        };
        self.addrs
            .iter()
            .map(|addr| {
                if with_db {
                    format!("redis://{}{}/{}", auth, addr, self.db)
                } else {
                    format!("redis://{}{}", auth, addr)
                }
            })
            .collect()
    }
}

/// Split `addr1;addr2` and check each is `host:port`.
pub fn parse_addrs(list: &str) -> SessionResult<Vec<String>> {
    let addrs: Vec<String> = list
        .split(';')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect();

    if addrs.is_empty() {
        return Err(SessionError::config("connection string has no address"));
    }

    for addr in &addrs {
        let valid = addr
            .rsplit_once(':')
            .is_some_and(|(host, port)| !host.is_empty() && port.parse::<u16>().is_ok());
        if !valid {
            return Err(SessionError::config(format!(
                "invalid address '{}', expected host:port",
                addr
            )));
        }
    }

    Ok(addrs)
}
