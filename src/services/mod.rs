/// Turns expired grace periods into refunds.
pub mod abandonment;
/// Cross-game room code registry.
pub mod code_registry;
/// OpenAPI documentation generation.
pub mod documentation;
/// Server-side move validation per game.
pub mod game_rules;
/// Health check service.
pub mod health_service;
/// Lobby SSE message generation.
pub mod lobby_events;
/// Prize split policies.
pub mod payout;
/// Room operations with their realtime fan-out.
pub mod room_service;
/// Escrow, payout and refund transactions.
pub mod settlement;
/// Lobby SSE streaming.
pub mod sse_service;
/// Storage connection supervisor toggling degraded mode.
pub mod storage_supervisor;
/// Durable inactivity sweep.
pub mod sweep;
/// Room WebSocket connection handling.
pub mod websocket_service;
