//! Cross-game room code namespace.

use std::{sync::Arc, time::SystemTime};

use rand::Rng;
use tracing::debug;
use uuid::Uuid;

use crate::{
    dao::{
        models::{CodeReservationEntity, CodeStatus},
        room_store::{RoomStore, UnitOfWork},
    },
    error::SettlementError,
    state::room::GameType,
};

/// Number of digits of a room code.
pub const CODE_LENGTH: usize = 6;
const CODE_SPACE: u32 = 1_000_000;

/// Source of candidate codes.
pub type CodeGenerator = Arc<dyn Fn() -> String + Send + Sync>;

/// Whether `code` has the shape of a room code.
pub fn is_valid_code(code: &str) -> bool {
    code.len() == CODE_LENGTH && code.bytes().all(|byte| byte.is_ascii_digit())
}

/// Draw a uniformly random six digit code, leading zeros included.
pub fn random_code<R: Rng + ?Sized>(rng: &mut R) -> String {
    format!("{:0width$}", rng.random_range(0..CODE_SPACE), width = CODE_LENGTH)
}

/// Reserves, resolves and retires room codes.
///
/// Reservations rely on the store's unique-active-code constraint: a candidate
/// already active elsewhere is refused and another random candidate is drawn, up to
/// the configured number of attempts.
#[derive(Clone)]
pub struct CodeRegistry {
    store: Arc<dyn RoomStore>,
    attempts: u32,
    generator: CodeGenerator,
}

impl CodeRegistry {
    /// Registry drawing codes from the thread-local random generator.
    pub fn new(store: Arc<dyn RoomStore>, attempts: u32) -> Self {
        Self::with_generator(store, attempts, Arc::new(|| random_code(&mut rand::rng())))
    }

    /// Registry drawing candidates from `generator`.
    pub fn with_generator(store: Arc<dyn RoomStore>, attempts: u32, generator: CodeGenerator) -> Self {
        Self {
            store,
            attempts: attempts.max(1),
            generator,
        }
    }

    /// Reserve a fresh code for `room_id` in its own unit of work.
    pub async fn reserve(&self, game_type: GameType, room_id: Uuid) -> Result<String, SettlementError> {
        let mut unit = self.store.begin().await?;
        match self.reserve_in(unit.as_mut(), game_type, room_id).await {
            Ok(code) => {
                unit.commit().await?;
                Ok(code)
            }
            Err(err) => {
                unit.rollback().await?;
                Err(err)
            }
        }
    }

    /// Reserve a fresh code for `room_id` inside the caller's unit of work.
    pub async fn reserve_in(
        &self,
        unit: &mut dyn UnitOfWork,
        game_type: GameType,
        room_id: Uuid,
    ) -> Result<String, SettlementError> {
        for attempt in 1..=self.attempts {
            let candidate = (self.generator)();
            let reservation = CodeReservationEntity {
                code: candidate.clone(),
                game_type,
                room_id,
                status: CodeStatus::Active,
                reserved_at: SystemTime::now(),
            };
            if unit.reserve_code(reservation).await? {
                debug!(code = %candidate, %game_type, attempt, "room code reserved");
                return Ok(candidate);
            }
            debug!(code = %candidate, attempt, "room code collision");
        }

        Err(SettlementError::CodeSpaceExhausted {
            attempts: self.attempts,
        })
    }

    /// Latest registry row for `code`.
    pub async fn find(&self, code: &str) -> Result<Option<CodeReservationEntity>, SettlementError> {
        if !is_valid_code(code) {
            return Err(SettlementError::InvalidRoomCode(code.to_owned()));
        }
        Ok(self.store.find_code(code).await?)
    }

    /// Retire the active reservation of `code`, making the code reusable.
    pub async fn retire_in(
        &self,
        unit: &mut dyn UnitOfWork,
        code: &str,
        status: CodeStatus,
    ) -> Result<(), SettlementError> {
        debug_assert_ne!(status, CodeStatus::Active);
        unit.retire_code(code, status).await?;
        debug!(%code, status = status.as_str(), "room code retired");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::dao::room_store::memory::MemoryRoomStore;

    fn scripted(codes: &[&str]) -> CodeGenerator {
        let queue = Mutex::new(
            codes
                .iter()
                .map(|code| (*code).to_owned())
                .collect::<Vec<_>>(),
        );
        Arc::new(move || {
            let mut queue = queue.lock().unwrap();
            if queue.len() > 1 {
                queue.remove(0)
            } else {
                queue[0].clone()
            }
        })
    }

    #[test]
    fn random_codes_are_six_digits() {
        let mut rng = rand::rng();
        for _ in 0..1000 {
            let code = random_code(&mut rng);
            assert!(is_valid_code(&code), "{code}");
        }
        assert!(!is_valid_code("12345"));
        assert!(!is_valid_code("12a456"));
    }

    #[tokio::test]
    async fn collision_draws_another_candidate() {
        let store = Arc::new(MemoryRoomStore::new());
        let registry = CodeRegistry::with_generator(
            store.clone(),
            4,
            scripted(&["111111", "111111", "222222"]),
        );

        let first = registry
            .reserve(GameType::Cards, Uuid::new_v4())
            .await
            .unwrap();
        let second = registry
            .reserve(GameType::Bingo, Uuid::new_v4())
            .await
            .unwrap();

        assert_eq!(first, "111111");
        assert_eq!(second, "222222");
    }

    #[tokio::test]
    async fn exhausted_budget_fails() {
        let store = Arc::new(MemoryRoomStore::new());
        let registry = CodeRegistry::with_generator(store.clone(), 3, scripted(&["333333"]));
        registry
            .reserve(GameType::TicTacToe, Uuid::new_v4())
            .await
            .unwrap();

        let err = registry
            .reserve(GameType::Billiards, Uuid::new_v4())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            SettlementError::CodeSpaceExhausted { attempts: 3 }
        ));
    }

    #[tokio::test]
    async fn retired_code_is_reusable() {
        let store = Arc::new(MemoryRoomStore::new());
        let registry = CodeRegistry::with_generator(store.clone(), 1, scripted(&["444444"]));
        let first_room = Uuid::new_v4();
        let code = registry
            .reserve(GameType::Cards, first_room)
            .await
            .unwrap();

        let mut unit = store.begin().await.unwrap();
        registry
            .retire_in(unit.as_mut(), &code, CodeStatus::Finished)
            .await
            .unwrap();
        unit.commit().await.unwrap();

        let second_room = Uuid::new_v4();
        let reused = registry
            .reserve(GameType::Bingo, second_room)
            .await
            .unwrap();
        assert_eq!(reused, code);

        let row = registry.find(&code).await.unwrap().unwrap();
        assert_eq!(row.room_id, second_room);
        assert_eq!(row.game_type, GameType::Bingo);
        assert_eq!(row.status, CodeStatus::Active);
    }
}
