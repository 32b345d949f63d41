use sha1::{Digest, Sha1};

use crate::contexts::attribute_reference::Reference;
use crate::contexts::context::{Context, Kind};
use crate::eval::EvalError;
use crate::AttributeValue;

const BUCKET_SCALE_INT: i64 = 0x0FFF_FFFF_FFFF_FFFF;
const BUCKET_SCALE: f32 = BUCKET_SCALE_INT as f32;

/// The part of the hash input that precedes the bucketed value.
#[derive(Clone, Copy, Debug)]
pub(crate) enum BucketPrefix<'a> {
    KeyAndSalt(&'a str, &'a str),
    // A seed replaces both key and salt, so rollouts sharing a seed bucket identically.
    Seed(i64),
}

impl<'a> BucketPrefix<'a> {
    fn write_hash(&self, hash: &mut Sha1) {
        match self {
            BucketPrefix::KeyAndSalt(key, salt) => {
                hash.update(key.as_bytes());
                hash.update(b".");
                hash.update(salt.as_bytes());
            }
            BucketPrefix::Seed(seed) => {
                let seed_str = seed.to_string();
                hash.update(seed_str.as_bytes());
            }
        }
    }
}

/// Maps the context of kind `kind` to a number in [0, 1).
///
/// Returns `Ok(None)` if the context has no such kind. The value comes from `by_attr`, or from
/// the key when `by_attr` is absent or the rollout is an experiment. Values that cannot be
/// bucketed (see [AttributeValue::as_bucketable]) and missing attributes land in bucket 0.
pub(crate) fn bucket(
    context: &Context,
    kind: &Kind,
    by_attr: Option<&Reference>,
    prefix: BucketPrefix,
    is_experiment: bool,
) -> Result<Option<f32>, EvalError> {
    let context = match context.as_kind(kind) {
        Some(context) => context,
        None => return Ok(None),
    };

    let value = match by_attr {
        Some(reference) if !is_experiment => {
            if !reference.is_valid() {
                return Err(EvalError::InvalidReference(
                    reference.to_string(),
                    reference.error(),
                ));
            }
            context.get_value(reference)
        }
        _ => Some(AttributeValue::String(context.key().to_owned())),
    };

    let secondary = if is_experiment {
        None
    } else {
        context.secondary()
    };

    Ok(Some(
        value
            .and_then(|value| value.as_bucketable())
            .map_or(0.0, |id| hash_bucket(id, secondary, prefix)),
    ))
}

fn hash_bucket(mut id: String, secondary: Option<&str>, prefix: BucketPrefix) -> f32 {
    if let Some(secondary) = secondary {
        id.push('.');
        id.push_str(secondary);
    }

    let mut hash = Sha1::new();
    prefix.write_hash(&mut hash);
    hash.update(b".");
    hash.update(id.as_bytes());

    let digest = hash.finalize();
    let hexhash = base16ct::lower::encode_string(&digest);

    let hexhash_15 = &hexhash[..15]; // yes, 15 chars, not 16
    i64::from_str_radix(hexhash_15, 16).map_or(0.0, |numhash| numhash as f32 / BUCKET_SCALE)
}
