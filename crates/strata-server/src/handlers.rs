//! Packet handlers the server registers with its connection manager.

use std::time::{SystemTime, UNIX_EPOCH};

use strata_net::{
    Authenticate, ChatMessage, ChunkSubscribe, ChunkUnsubscribe, ControllerRef, DispatchRegistry,
    HandlerContext, PacketType, Request, VoxelInfoBundle, VoxelUpdate,
};

use strata_voxel::world_to_chunk;
use strata_world::EntityId;

use crate::game::GameState;

/// Register every server packet handler, replacing the manager's default
/// `Authenticate` handler.
pub fn register_handlers(registry: &mut DispatchRegistry<GameState>) {
    registry.register_typed::<Authenticate, _>(on_authenticate);
    registry.register_typed::<ChatMessage, _>(on_chat_message);
    registry.register_typed::<Request, _>(on_request);
    registry.register_typed::<ChunkSubscribe, _>(on_chunk_subscribe);
    registry.register_typed::<ChunkUnsubscribe, _>(on_chunk_unsubscribe);
    registry.register_typed::<VoxelUpdate, _>(on_voxel_update);
}

/// The player the sender controls.
fn sender_controller(ctx: &HandlerContext<'_, GameState>) -> Option<ControllerRef> {
    ctx.connections.get(ctx.sender)?.controller().cloned()
}

/// Name of the world the sender's player lives in.
fn sender_world(ctx: &HandlerContext<'_, GameState>) -> Option<String> {
    sender_controller(ctx).map(|c| c.world)
}

fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Accept a unique name and spawn the client's player in the default world.
pub fn on_authenticate(auth: Authenticate, ctx: &mut HandlerContext<'_, GameState>) -> bool {
    let username = auth.username;
    if let Err(rejection) = ctx.connections.check_username(&username) {
        ctx.diag
            .info(format_args!("{} refused: {rejection}", ctx.sender));
        return false;
    }

    let Some(world_name) = ctx.state.default_world().map(str::to_string) else {
        ctx.diag
            .warning(format_args!("{} refused: no default world", ctx.sender));
        return false;
    };
    let Some(world) = ctx
        .state
        .world_mut(&world_name)
        .filter(|w| w.is_running())
    else {
        ctx.diag.warning(format_args!(
            "{} refused: world '{world_name}' is not running",
            ctx.sender
        ));
        return false;
    };

    let player = match world.add_player(&username) {
        Ok(id) => id,
        Err(e) => {
            ctx.diag
                .error(format_args!("Could not spawn '{username}': {e}"));
            return false;
        }
    };

    if let Err(rejection) = ctx.connections.authenticate(ctx.sender, &username) {
        ctx.diag
            .info(format_args!("{} refused: {rejection}", ctx.sender));
        let _ = world.remove_player(player);
        return false;
    }
    if let Some(connection) = ctx.connections.get_mut(ctx.sender) {
        connection.set_controller(Some(ControllerRef {
            world: world_name,
            player: player.raw(),
        }));
    }
    true
}

/// Relay chat to everyone, stamped with the sender's name and server time.
pub fn on_chat_message(mut chat: ChatMessage, ctx: &mut HandlerContext<'_, GameState>) -> bool {
    let Some(sender) = ctx.connections.get(ctx.sender) else {
        return false;
    };
    chat.sender = sender.username().to_string();
    chat.timestamp = unix_millis();
    ctx.diag
        .info(format_args!("<{}> {}", chat.sender, chat.text));
    ctx.connections.broadcast(chat);
    true
}

pub fn on_request(request: Request, ctx: &mut HandlerContext<'_, GameState>) -> bool {
    match request.requested {
        PacketType::VoxelInfoBundle => {
            let document = ctx.state.catalogue().document().to_vec();
            ctx.connections
                .send(ctx.sender, VoxelInfoBundle { document });
            true
        }
        other => {
            ctx.diag.warning(format_args!(
                "{} requested {other:?}, which is not served on request",
                ctx.sender
            ));
            false
        }
    }
}

/// Start streaming a chunk within render distance of the sender's player.
/// The world loads it at its next tick.
pub fn on_chunk_subscribe(
    subscribe: ChunkSubscribe,
    ctx: &mut HandlerContext<'_, GameState>,
) -> bool {
    let chunk = subscribe.chunk;
    let Some(controller) = sender_controller(ctx) else {
        return false;
    };
    let Some(world) = ctx.state.world_mut(&controller.world) else {
        return false;
    };
    let player = EntityId::from_raw(controller.player);
    if !world.in_view_of(player, chunk) {
        ctx.diag.warning(format_args!(
            "{} subscribed to chunk {chunk} beyond render distance {}",
            ctx.sender,
            world.render_distance()
        ));
        return false;
    }
    if !world.request_chunk(chunk) {
        return false;
    }
    if let Some(connection) = ctx.connections.get_mut(ctx.sender) {
        connection.subscribe(chunk);
    }
    true
}

/// Stop streaming a chunk, unloading it once nobody in its world watches it.
pub fn on_chunk_unsubscribe(
    unsubscribe: ChunkUnsubscribe,
    ctx: &mut HandlerContext<'_, GameState>,
) -> bool {
    let chunk = unsubscribe.chunk;
    let Some(world_name) = sender_world(ctx) else {
        return false;
    };
    let removed = ctx
        .connections
        .get_mut(ctx.sender)
        .is_some_and(|c| c.unsubscribe(chunk));
    if !removed {
        return true;
    }

    let watched = ctx.connections.authenticated().any(|c| {
        c.is_subscribed(chunk) && c.controller().is_some_and(|r| r.world == world_name)
    });
    if !watched
        && let Some(world) = ctx.state.world_mut(&world_name)
        && let Err(e) = world.unload_chunk(chunk)
    {
        ctx.diag.error(format_args!(
            "Could not unload chunk {chunk} of '{world_name}': {e}"
        ));
    }
    true
}

/// Queue a voxel edit in the sender's world. Unknown voxel types and edits
/// beyond render distance are refused.
pub fn on_voxel_update(update: VoxelUpdate, ctx: &mut HandlerContext<'_, GameState>) -> bool {
    if !ctx.state.catalogue().contains(update.voxel.id) {
        ctx.diag.warning(format_args!(
            "{} sent unknown voxel type {} at {}",
            ctx.sender, update.voxel.id, update.position
        ));
        return false;
    }
    let Some(controller) = sender_controller(ctx) else {
        return false;
    };
    let Some(world) = ctx
        .state
        .world_mut(&controller.world)
        .filter(|w| w.is_running())
    else {
        return false;
    };
    let (chunk, _) = world_to_chunk(update.position);
    if !world.in_view_of(EntityId::from_raw(controller.player), chunk) {
        ctx.diag.warning(format_args!(
            "{} edited {} beyond render distance {}",
            ctx.sender,
            update.position,
            world.render_distance()
        ));
        return false;
    }
    world.queue_voxel_update(update.position, update.voxel);
    true
}
