//! Account events

use crate::domain::{Account, NotificationKind};
use crate::store::{StoreError, StoreTransaction};

use super::{Effect, Notice};

pub(super) async fn open(
    tx: &mut dyn StoreTransaction,
    account: &Account,
) -> Result<Effect, StoreError> {
    tx.insert_account(account).await?;
    Ok(Effect::applied(Notice::new(
        account.id,
        NotificationKind::Welcome,
        format!(
            "Welcome! Your {} account {} is open.",
            account.account_type.as_str().to_lowercase(),
            account.number
        ),
    )))
}

/// Balance is owned by the transactions stream and never taken from an
/// account payload
pub(super) async fn set_status(
    tx: &mut dyn StoreTransaction,
    account: &Account,
) -> Result<Effect, StoreError> {
    if !tx
        .update_account_status(account.id, account.status, account.updated_at)
        .await?
    {
        return Ok(Effect::rejected("account not found", None));
    }
    Ok(Effect::applied(Notice::new(
        account.id,
        NotificationKind::StatusChange,
        format!("Your account status is now {}.", account.status),
    )))
}
