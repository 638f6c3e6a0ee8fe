/// Router Module Index
///
/// Splits the routing table by access level. The global `require_auth` layer sits above
/// all of them; what differs per module is what happens after authentication.

/// Routes on the public allow-list (no access token).
pub mod public;

/// Routes open to any authenticated principal. Ownership is checked in the handlers.
pub mod authenticated;

/// Routes restricted to the Author role by a `RoleGate` route layer.
pub mod author;
