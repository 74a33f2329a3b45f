pub use enclose::*;

#[macro_export]
macro_rules! computed {
    (( $($d_tt:tt)* ) $ctx:ident => $($b:tt)*) => {
        $crate::runtime::Computed::new($crate::macros::enclose!(($( $d_tt )*) Box::new(move |$ctx: &$crate::runtime::Evaluation| { $($b)* })))
    };
    ($ctx:ident => $($b:tt)*) => {
        $crate::runtime::Computed::new(Box::new(move |$ctx: &$crate::runtime::Evaluation| { $($b)* }))
    };
}

#[macro_export]
macro_rules! reaction {
    ($name:literal, ( $($d_tt:tt)* ) $ctx:ident => $($b:tt)*) => {{
        let reaction = $crate::runtime::Reaction::new_with_name($name, $crate::macros::enclose!(($( $d_tt )*) Box::new(move |$ctx: &$crate::runtime::Evaluation| { $($b)* })));
        reaction.update();
        reaction
    }};
    (( $($d_tt:tt)* ) $ctx:ident => $($b:tt)*) => {{
        let reaction = $crate::runtime::Reaction::new($crate::macros::enclose!(($( $d_tt )*) Box::new(move |$ctx: &$crate::runtime::Evaluation| { $($b)* })));
        reaction.update();
        reaction
    }};
    ($ctx:ident => $($b:tt)*) => {{
        let reaction = $crate::runtime::Reaction::new(Box::new(move |$ctx: &$crate::runtime::Evaluation| { $($b)* }));
        reaction.update();
        reaction
    }};
}
