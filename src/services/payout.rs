//! Prize split policies. Amounts are fixed-point decimals; every share is rounded
//! toward zero at the pot's scale and the remainder goes to the platform wallet, so
//! the shares of a distribution always add up to the pot exactly.

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::{dao::models::LedgerKind, error::SettlementError, state::room::GameType};

const POOL_WINNER_PERCENT: i64 = 70;
const POOL_HOST_PERCENT: i64 = 20;

/// How a settled pot is divided.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum SplitPolicy {
    /// The whole pot goes to the winner.
    WinnerTakesAll,
    /// Equal shares for every participant.
    Draw,
    /// 70% winner, 20% host, 10% platform.
    Pool,
}

impl SplitPolicy {
    /// Policy used when the caller does not pick one.
    pub fn default_for(game_type: GameType, winner: Option<&str>) -> Self {
        match (game_type.is_pool(), winner) {
            (_, None) => SplitPolicy::Draw,
            (true, Some(_)) => SplitPolicy::Pool,
            (false, Some(_)) => SplitPolicy::WinnerTakesAll,
        }
    }
}

/// Recipient category of a share.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ShareRole {
    /// Winner of the game.
    Winner,
    /// Participant of a drawn game.
    Participant,
    /// Host share of a pool.
    Host,
    /// Platform fee and rounding remainder.
    Platform,
}

impl ShareRole {
    /// Ledger kind recorded for a credit of this role.
    pub fn ledger_kind(self) -> LedgerKind {
        match self {
            ShareRole::Winner | ShareRole::Participant => LedgerKind::Payout,
            ShareRole::Host => LedgerKind::HostFee,
            ShareRole::Platform => LedgerKind::PlatformFee,
        }
    }
}

/// One credit of a distribution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Share {
    /// Credited wallet.
    pub user_id: String,
    /// Why this wallet receives funds.
    pub role: ShareRole,
    /// Credited amount.
    #[schema(value_type = String)]
    pub amount: Decimal,
}

/// Every credit of a settled pot.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Distribution {
    /// Non-zero credits in payout order.
    pub shares: Vec<Share>,
}

impl Distribution {
    /// Sum of every share.
    pub fn total(&self) -> Decimal {
        self.shares.iter().map(|share| share.amount).sum()
    }

    fn push(&mut self, user_id: &str, role: ShareRole, amount: Decimal) {
        if amount.is_zero() {
            return;
        }
        self.shares.push(Share {
            user_id: user_id.to_owned(),
            role,
            amount,
        });
    }
}

/// Inputs of a split computation.
#[derive(Debug, Clone, Copy)]
pub struct PotContext<'a> {
    /// Escrowed total to distribute.
    pub pot: Decimal,
    /// Creator of the room.
    pub host_id: &'a str,
    /// Escrowed participants in join order.
    pub participants: &'a [String],
    /// Wallet receiving fees and remainders.
    pub platform_wallet: &'a str,
}

impl SplitPolicy {
    /// Divide the pot. Winner-based policies require a winner who is a participant.
    pub fn distribute(
        self,
        context: PotContext<'_>,
        code: &str,
        winner: Option<&str>,
    ) -> Result<Distribution, SettlementError> {
        let PotContext {
            pot,
            host_id,
            participants,
            platform_wallet,
        } = context;
        let scale = pot.scale();
        let mut distribution = Distribution::default();

        match self {
            SplitPolicy::WinnerTakesAll => {
                let winner = require_winner(code, winner, participants)?;
                distribution.push(winner, ShareRole::Winner, pot);
            }
            SplitPolicy::Draw => {
                if participants.is_empty() {
                    distribution.push(platform_wallet, ShareRole::Platform, pot);
                    return Ok(distribution);
                }
                let each = floor(pot / Decimal::from(participants.len()), scale);
                for participant in participants {
                    distribution.push(participant, ShareRole::Participant, each);
                }
            }
            SplitPolicy::Pool => {
                let winner = require_winner(code, winner, participants)?;
                let winner_share = percent_of(pot, POOL_WINNER_PERCENT, scale);
                let host_share = percent_of(pot, POOL_HOST_PERCENT, scale);
                distribution.push(winner, ShareRole::Winner, winner_share);
                distribution.push(host_id, ShareRole::Host, host_share);
            }
        }

        let remainder = pot - distribution.total();
        distribution.push(platform_wallet, ShareRole::Platform, remainder);
        debug_assert_eq!(distribution.total(), pot);
        Ok(distribution)
    }
}

fn require_winner<'a>(
    code: &str,
    winner: Option<&'a str>,
    participants: &[String],
) -> Result<&'a str, SettlementError> {
    let winner =
        winner.ok_or_else(|| SettlementError::InvalidMove("a winner is required".into()))?;
    if !participants.iter().any(|participant| participant == winner) {
        return Err(SettlementError::NotParticipant {
            code: code.to_owned(),
            user_id: winner.to_owned(),
        });
    }
    Ok(winner)
}

fn percent_of(pot: Decimal, percent: i64, scale: u32) -> Decimal {
    floor(pot * Decimal::from(percent) / Decimal::ONE_HUNDRED, scale)
}

fn floor(amount: Decimal, scale: u32) -> Decimal {
    amount.round_dp_with_strategy(scale, RoundingStrategy::ToZero)
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use rust_decimal_macros::dec;

    use super::*;

    fn players(ids: &[&str]) -> Vec<String> {
        ids.iter().map(|id| (*id).to_owned()).collect()
    }

    fn context<'a>(pot: Decimal, participants: &'a [String]) -> PotContext<'a> {
        PotContext {
            pot,
            host_id: "host",
            participants,
            platform_wallet: "platform",
        }
    }

    fn amount_of(distribution: &Distribution, user_id: &str, role: ShareRole) -> Decimal {
        distribution
            .shares
            .iter()
            .filter(|share| share.user_id == user_id && share.role == role)
            .map(|share| share.amount)
            .sum()
    }

    #[test]
    fn winner_takes_the_whole_pot() {
        let participants = players(&["host", "guest"]);
        let distribution = SplitPolicy::WinnerTakesAll
            .distribute(context(dec!(200), &participants), "123456", Some("host"))
            .unwrap();
        assert_eq!(
            distribution.shares,
            vec![Share {
                user_id: "host".into(),
                role: ShareRole::Winner,
                amount: dec!(200),
            }]
        );
    }

    #[test]
    fn pool_splits_seventy_twenty_ten() {
        let participants = players(&["host", "a", "b", "c"]);
        let distribution = SplitPolicy::Pool
            .distribute(context(dec!(1000), &participants), "123456", Some("a"))
            .unwrap();
        assert_eq!(amount_of(&distribution, "a", ShareRole::Winner), dec!(700));
        assert_eq!(amount_of(&distribution, "host", ShareRole::Host), dec!(200));
        assert_eq!(
            amount_of(&distribution, "platform", ShareRole::Platform),
            dec!(100)
        );
    }

    #[test]
    fn uneven_pool_remainder_goes_to_platform() {
        let participants = players(&["host", "a", "b"]);
        let distribution = SplitPolicy::Pool
            .distribute(context(dec!(15), &participants), "123456", Some("b"))
            .unwrap();
        assert_eq!(amount_of(&distribution, "b", ShareRole::Winner), dec!(10));
        assert_eq!(amount_of(&distribution, "host", ShareRole::Host), dec!(3));
        assert_eq!(
            amount_of(&distribution, "platform", ShareRole::Platform),
            dec!(2)
        );
    }

    #[test]
    fn odd_draw_leaves_remainder_to_platform() {
        let participants = players(&["host", "a", "b"]);
        let distribution = SplitPolicy::Draw
            .distribute(context(dec!(100), &participants), "123456", None)
            .unwrap();
        for id in ["host", "a", "b"] {
            assert_eq!(amount_of(&distribution, id, ShareRole::Participant), dec!(33));
        }
        assert_eq!(
            amount_of(&distribution, "platform", ShareRole::Platform),
            dec!(1)
        );
    }

    #[test]
    fn winner_must_be_a_participant() {
        let participants = players(&["host", "guest"]);
        let err = SplitPolicy::WinnerTakesAll
            .distribute(context(dec!(200), &participants), "123456", Some("intruder"))
            .unwrap_err();
        assert!(matches!(err, SettlementError::NotParticipant { .. }));

        let err = SplitPolicy::Pool
            .distribute(context(dec!(200), &participants), "123456", None)
            .unwrap_err();
        assert!(matches!(err, SettlementError::InvalidMove(_)));
    }

    #[test]
    fn default_policy_follows_game_family() {
        assert_eq!(
            SplitPolicy::default_for(GameType::TicTacToe, Some("a")),
            SplitPolicy::WinnerTakesAll
        );
        assert_eq!(
            SplitPolicy::default_for(GameType::Bingo, Some("a")),
            SplitPolicy::Pool
        );
        assert_eq!(
            SplitPolicy::default_for(GameType::Cards, None),
            SplitPolicy::Draw
        );
    }

    proptest! {
        #[test]
        fn shares_always_sum_to_the_pot(
            cents in 0i64..10_000_000,
            scale in 0u32..3,
            count in 1usize..10,
            policy in prop_oneof![
                Just(SplitPolicy::WinnerTakesAll),
                Just(SplitPolicy::Draw),
                Just(SplitPolicy::Pool),
            ],
        ) {
            let pot = Decimal::new(cents, scale);
            let participants: Vec<String> = (0..count).map(|i| format!("user-{i}")).collect();
            let distribution = policy
                .distribute(context(pot, &participants), "123456", Some("user-0"))
                .unwrap();
            prop_assert_eq!(distribution.total(), pot);
            prop_assert!(distribution.shares.iter().all(|share| share.amount > Decimal::ZERO));
        }
    }
}
