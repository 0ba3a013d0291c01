pub use anyhow::{bail, Context, Result as Fallible};
pub use argh::FromArgs;
pub use chrono::Local;
pub use derivative::Derivative;
pub use itertools::{izip, Itertools};
pub use log::{debug, error, info, warn};
pub use rand::{rngs::StdRng, seq::SliceRandom, Rng, SeedableRng};
pub use serde::{de::Error as DeserializeError, Deserialize, Deserializer, Serialize, Serializer};
pub use std::{
    borrow::Borrow,
    collections::HashMap,
    fmt::{self, Display},
    fs::{self, File},
    io::{BufReader, BufWriter},
    path::{Path, PathBuf},
    sync::atomic::{AtomicBool, Ordering},
    thread,
    time::Instant,
};
pub use tch::{
    nn::{self, BatchNorm, Conv1D, ConvConfig, Linear, VarStore},
    Device, Kind, Reduction, TchError, Tensor,
};
