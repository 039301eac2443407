//! Message trait - 型付きメッセージの定義
//!
//! `TYPE` は message-type header に書かれ、受信側で deserializer を引く key になります。

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use serde::de::DeserializeOwned;

/// Message は型名とペイロード型を対応付ける
///
/// # 使用例
/// ```ignore
/// #[derive(Clone, Serialize, Deserialize)]
/// struct OrderPlaced { order_id: String }
///
/// impl Message for OrderPlaced {
///     const TYPE: &'static str = "shop.order.placed.v1";
/// }
/// ```
pub trait Message: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    /// 命名規約: `{namespace}.{domain}.{event}.v{major}`
    const TYPE: &'static str;
}

/// A deserialized message with its concrete type erased.
///
/// Base-type views produced by the registry are `IncomingMessage`s too, with
/// `message_type` set to the base type.
#[derive(Clone)]
pub struct IncomingMessage {
    message_type: &'static str,
    body: Arc<dyn Any + Send + Sync>,
}

impl IncomingMessage {
    pub fn new<M: Message>(message: M) -> Self {
        Self {
            message_type: M::TYPE,
            body: Arc::new(message),
        }
    }

    pub fn message_type(&self) -> &'static str {
        self.message_type
    }

    pub fn downcast_ref<M: Message>(&self) -> Option<&M> {
        self.body.downcast_ref::<M>()
    }
}

impl fmt::Debug for IncomingMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IncomingMessage")
            .field("message_type", &self.message_type)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Message types shared by unit tests.

    use serde::{Deserialize, Serialize};

    use super::Message;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    pub struct Ping {
        pub value: i32,
    }

    impl Message for Ping {
        const TYPE: &'static str = "test.ping.v1";
    }

    /// Base type of [`AccountOpened`].
    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    pub struct AccountEvent {
        pub account_id: String,
    }

    impl Message for AccountEvent {
        const TYPE: &'static str = "test.account.event.v1";
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    pub struct AccountOpened {
        pub account_id: String,
        pub owner: String,
    }

    impl Message for AccountOpened {
        const TYPE: &'static str = "test.account.opened.v1";
    }

    impl From<&AccountOpened> for AccountEvent {
        fn from(opened: &AccountOpened) -> Self {
            Self {
                account_id: opened.account_id.clone(),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::{AccountOpened, Ping};
    use super::*;

    #[test]
    fn incoming_message_downcasts_to_its_own_type_only() {
        let incoming = IncomingMessage::new(Ping { value: 7 });

        assert_eq!(incoming.message_type(), Ping::TYPE);
        assert_eq!(incoming.downcast_ref::<Ping>(), Some(&Ping { value: 7 }));
        assert!(incoming.downcast_ref::<AccountOpened>().is_none());
    }
}
