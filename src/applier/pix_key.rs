//! PIX key events

use crate::domain::{NotificationKind, PixKey};
use crate::store::{StoreError, StoreTransaction};

use super::{Effect, Notice};

pub(super) async fn register(
    tx: &mut dyn StoreTransaction,
    key: &PixKey,
) -> Result<Effect, StoreError> {
    if tx.lock_account(key.account_id).await?.is_none() {
        return Ok(Effect::rejected("account not found", None));
    }
    tx.insert_pix_key(key).await?;
    Ok(Effect::applied(Notice::new(
        key.account_id,
        NotificationKind::PixKeyRegistered,
        format!("Your {} PIX key {} is registered.", key.key_type, key.key),
    )))
}

pub(super) async fn remove(
    tx: &mut dyn StoreTransaction,
    key: &PixKey,
) -> Result<Effect, StoreError> {
    if !tx.delete_pix_key(key.id).await? {
        return Ok(Effect::rejected("PIX key not found", None));
    }
    Ok(Effect::applied(Notice::new(
        key.account_id,
        NotificationKind::PixKeyRemoved,
        format!("Your {} PIX key {} was removed.", key.key_type, key.key),
    )))
}
