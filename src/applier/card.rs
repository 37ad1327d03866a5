//! Credit card events

use crate::domain::{ledger_now, Balance, CreditCard, NotificationKind};
use crate::store::{StoreError, StoreTransaction};

use super::{Effect, Notice};

pub(super) async fn issue(
    tx: &mut dyn StoreTransaction,
    card: &CreditCard,
) -> Result<Effect, StoreError> {
    if tx.lock_account(card.account_id).await?.is_none() {
        return Ok(Effect::rejected("account not found", None));
    }

    tx.insert_credit_card(card).await?;
    Ok(Effect::applied(Notice::new(
        card.account_id,
        NotificationKind::CardCreated,
        format!(
            "Your credit card ending in {} was issued with a limit of {}.",
            card.last_digits(),
            card.credit_limit
        ),
    )))
}

/// Move the limit and shift the available amount by the same delta, so the
/// amount already spent on the card is preserved
pub(super) async fn change_limit(
    tx: &mut dyn StoreTransaction,
    requested: &CreditCard,
) -> Result<Effect, StoreError> {
    let Some(current) = tx.lock_credit_card(requested.id).await? else {
        return Ok(Effect::rejected("credit card not found", None));
    };

    let delta = requested.credit_limit.value() - current.credit_limit.value();
    let available = match Balance::new(current.available_limit.value() + delta) {
        Ok(available) => available,
        Err(_) => {
            let reason = format!(
                "new limit {} is below the outstanding amount {}",
                requested.credit_limit,
                current.outstanding()
            );
            let notice = Notice::new(
                current.account_id,
                NotificationKind::RequestRejected,
                format!("Your credit limit change was rejected: {}.", reason),
            );
            return Ok(Effect::rejected(reason, Some(notice)));
        }
    };

    tx.set_card_limits(current.id, requested.credit_limit, available, ledger_now())
        .await?;

    Ok(Effect::applied(Notice::new(
        current.account_id,
        NotificationKind::CardLimitChange,
        format!(
            "The limit of your credit card ending in {} is now {}.",
            current.last_digits(),
            requested.credit_limit
        ),
    )))
}
