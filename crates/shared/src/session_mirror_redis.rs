use redis::AsyncCommands;
use redis::aio::ConnectionManager;

use crate::session::Session;
use crate::session_store::{MirrorError, MirrorFuture, SessionMirror};

const DEFAULT_SESSION_KEY_PREFIX: &str = "croplens:session:v1";

#[derive(Clone)]
pub struct RedisSessionMirror {
    connection: ConnectionManager,
    key_prefix: String,
}

impl RedisSessionMirror {
    pub async fn connect(redis_url: &str) -> Result<Self, MirrorError> {
        let client = redis::Client::open(redis_url).map_err(backend_error)?;
        let connection = ConnectionManager::new(client)
            .await
            .map_err(backend_error)?;

        let mut health_connection = connection.clone();
        redis::cmd("PING")
            .query_async::<String>(&mut health_connection)
            .await
            .map_err(|err| MirrorError::Backend(format!("failed to connect to redis: {err}")))?;

        Ok(Self {
            connection,
            key_prefix: DEFAULT_SESSION_KEY_PREFIX.to_string(),
        })
    }

    fn session_key(&self, session_id: &str) -> String {
        format!("{}:{session_id}", self.key_prefix)
    }
}

impl SessionMirror for RedisSessionMirror {
    fn save<'a>(&'a self, session: &'a Session, ttl_seconds: u64) -> MirrorFuture<'a, ()> {
        Box::pin(async move {
            let payload = serde_json::to_string(session)
                .map_err(|err| MirrorError::InvalidPayload(err.to_string()))?;
            let mut connection = self.connection.clone();
            connection
                .set_ex::<_, _, ()>(self.session_key(session.id()), payload, ttl_seconds.max(1))
                .await
                .map_err(backend_error)
        })
    }

    fn load<'a>(&'a self, session_id: &'a str) -> MirrorFuture<'a, Option<Session>> {
        Box::pin(async move {
            let mut connection = self.connection.clone();
            let payload: Option<String> = connection
                .get(self.session_key(session_id))
                .await
                .map_err(backend_error)?;

            payload
                .map(|raw| {
                    serde_json::from_str::<Session>(&raw)
                        .map_err(|err| MirrorError::InvalidPayload(err.to_string()))
                })
                .transpose()
        })
    }

    fn delete<'a>(&'a self, session_id: &'a str) -> MirrorFuture<'a, bool> {
        Box::pin(async move {
            let mut connection = self.connection.clone();
            let removed: i64 = connection
                .del(self.session_key(session_id))
                .await
                .map_err(backend_error)?;
            Ok(removed > 0)
        })
    }

    fn ping(&self) -> MirrorFuture<'_, ()> {
        Box::pin(async move {
            let mut connection = self.connection.clone();
            redis::cmd("PING")
                .query_async::<String>(&mut connection)
                .await
                .map(|_| ())
                .map_err(backend_error)
        })
    }
}

fn backend_error(err: redis::RedisError) -> MirrorError {
    MirrorError::Backend(err.to_string())
}
