/// Panics surface either through a panic hook as a `&(dyn Any + Send)` payload or through a
/// joined task as a `Box<dyn Any + Send>`. Those utilities extract the message from either.
use std::any::Any;

/// Extracts the message carried by a panic payload, if there is one.
pub fn payload_message(payload: &(dyn Any + Send)) -> Option<&str> {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        return Some(msg);
    }
    if let Some(msg) = payload.downcast_ref::<String>() {
        return Some(msg.as_str());
    }
    None
}

/// Attempt to create a `String` with the given context and downcast
/// the payload to look for a message within it. If no message is found,
/// the `String` will contain only the context.
pub fn panic_to_string(context: &str, payload: &(dyn Any + Send)) -> String {
    match payload_message(payload) {
        Some(msg) => format!("{}: {}", context, msg),
        None => format!("{} (no message)", context),
    }
}

/// Creates a `anyhow::Result::Err(..)` from a context and a panic payload
/// possibly containing a message.
pub fn panic_to_err<T>(context: &str, payload: Box<dyn Any + Send>) -> anyhow::Result<T> {
    Err(anyhow::anyhow!("{}", panic_to_string(context, &*payload)))
}
