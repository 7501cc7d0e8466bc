use core::fmt;
use std::time::Duration;

use redis::{Client, Connection, RedisError, RedisResult};

use crate::{mutex::Mutex, resolver::AtomicStore};

/// An [`AtomicStore`] backed by a Redis server, using `INCR` and `PEXPIRE`.
///
/// The store keeps one synchronous connection, opened on first use and
/// dropped after any failed command so the next call reconnects. Every
/// process pointing an [`AtomicStoreResolver`] at the same server shares one
/// sequence space.
///
/// ```no_run
/// use snowdrift::{AtomicStoreResolver, Generator, RedisStore};
///
/// let store = RedisStore::open("redis://127.0.0.1:6379/").unwrap();
/// let generator = Generator::builder()
///     .worker_id(3)
///     .sequence_resolver(AtomicStoreResolver::new(store))
///     .build()
///     .unwrap();
/// let id = generator.next_id().unwrap();
/// ```
///
/// [`AtomicStoreResolver`]: crate::AtomicStoreResolver
#[cfg_attr(docsrs, doc(cfg(feature = "redis")))]
pub struct RedisStore {
    client: Client,
    connection: Mutex<Option<Connection>>,
}

impl RedisStore {
    /// Creates a store for `url` (for example `redis://127.0.0.1:6379/0`).
    /// No connection is made until the first command.
    ///
    /// # Errors
    ///
    /// Returns the client error if `url` cannot be parsed.
    pub fn open(url: &str) -> Result<Self, RedisError> {
        Client::open(url).map(Self::from_client)
    }

    pub fn from_client(client: Client) -> Self {
        Self {
            client,
            connection: Mutex::new(None),
        }
    }

    fn with_connection<T>(
        &self,
        command: impl FnOnce(&mut Connection) -> RedisResult<T>,
    ) -> RedisResult<T> {
        #[cfg(feature = "parking-lot")]
        let mut slot = self.connection.lock();
        // A panic mid-command leaves at worst a broken connection, which
        // fails its next command and is then dropped.
        #[cfg(not(feature = "parking-lot"))]
        let mut slot = self
            .connection
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);

        let connection = match &mut *slot {
            Some(connection) => connection,
            empty => empty.insert(self.client.get_connection()?),
        };
        let result = command(connection);
        if result.is_err() {
            *slot = None;
        }
        result
    }
}

impl fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisStore")
            .field("addr", &self.client.get_connection_info().addr.to_string())
            .finish_non_exhaustive()
    }
}

impl AtomicStore for RedisStore {
    type Error = RedisError;

    fn increment_and_get(&self, key: &str) -> Result<i64, Self::Error> {
        self.with_connection(|connection| redis::cmd("INCR").arg(key).query(connection))
    }

    fn expire(&self, key: &str, ttl: Duration) -> Result<(), Self::Error> {
        let millis = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX);
        self.with_connection(|connection| {
            redis::cmd("PEXPIRE")
                .arg(key)
                .arg(millis)
                .query::<i64>(connection)
                .map(|_| ())
        })
    }
}
