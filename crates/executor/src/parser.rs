//! Recursive-descent parser: turns a [`crate::lexer::Token`] stream into a
//! [`Program`], translating directly into the appropriate [`Query`] shape as
//! it goes rather than building an intermediate generic statement tree
//! (spec §9 "Dynamic dispatch on query shapes").

use weave_core::error::{Error, Result};
use weave_core::value::Value;

use crate::ast::{BinOp, Expr, UnaryOp};
use crate::lexer::{self, Token};
use crate::query::{
    CollectClause, CmpOp, ConjunctiveQuery, CteBinding, Disjunct, DisjunctiveQuery, ForNode, JoinQuery, Program, Query, RangePredicate, SortDir,
    TraversalDirection, TraversalQuery, AggFunc,
};

/// Parses and translates `src` into an executable [`Program`].
pub fn parse(src: &str) -> Result<Program> {
    let tokens = lexer::lex(src)?;
    let mut p = Parser { tokens, pos: 0 };
    let program = p.parse_program()?;
    p.expect_eof()?;
    Ok(program)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

struct ForClauseSrc {
    vars: Vec<String>,
    traversal: Option<TraversalSrc>,
    collection: Option<String>,
}

struct TraversalSrc {
    min_depth: u32,
    max_depth: u32,
    direction: TraversalDirection,
    start_pk: String,
    graph: String,
}

impl Parser {
    fn peek(&self) -> &Token {
        &self.tokens[self.pos]
    }

    fn advance(&mut self) -> Token {
        let t = self.tokens[self.pos].clone();
        if self.pos + 1 < self.tokens.len() {
            self.pos += 1;
        }
        t
    }

    fn expect_eof(&self) -> Result<()> {
        if matches!(self.peek(), Token::Eof) {
            Ok(())
        } else {
            Err(Error::invalid(format!("trailing tokens after a complete query, starting at {:?}", self.peek())))
        }
    }

    fn is_keyword(&self, word: &str) -> bool {
        matches!(self.peek(), Token::Ident(s) if s.eq_ignore_ascii_case(word))
    }

    fn eat_keyword(&mut self, word: &str) -> bool {
        if self.is_keyword(word) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect_keyword(&mut self, word: &str) -> Result<()> {
        if self.eat_keyword(word) {
            Ok(())
        } else {
            Err(Error::invalid(format!("expected '{word}', found {:?}", self.peek())))
        }
    }

    fn expect_ident(&mut self) -> Result<String> {
        match self.advance() {
            Token::Ident(s) => Ok(s),
            other => Err(Error::invalid(format!("expected an identifier, found {other:?}"))),
        }
    }

    fn expect(&mut self, tok: &Token) -> Result<()> {
        if std::mem::discriminant(self.peek()) == std::mem::discriminant(tok) {
            self.advance();
            Ok(())
        } else {
            Err(Error::invalid(format!("expected {tok:?}, found {:?}", self.peek())))
        }
    }

    // ---- top level ----

    fn parse_program(&mut self) -> Result<Program> {
        let mut ctes = Vec::new();
        while self.is_keyword("WITH") {
            self.advance();
            let name = self.expect_ident()?;
            self.expect_keyword("AS")?;
            self.expect(&Token::LParen)?;
            let nested = self.parse_main()?;
            self.expect(&Token::RParen)?;
            ctes.push(CteBinding { name, query: nested.main });
        }
        let main = self.parse_main()?;
        Ok(Program { ctes, collect: main.collect, main: main.main })
    }

    fn parse_main(&mut self) -> Result<Program> {
        let for_clauses = self.parse_for_clauses()?;

        if for_clauses.len() == 1 && for_clauses[0].traversal.is_some() {
            return self.finish_traversal(for_clauses.into_iter().next().unwrap());
        }
        if for_clauses.iter().any(|f| f.traversal.is_some()) {
            return Err(Error::invalid("a traversal FOR cannot be combined with other FOR clauses"));
        }

        let mut let_nodes = Vec::new();
        while self.eat_keyword("LET") {
            let name = self.expect_ident()?;
            self.expect(&Token::Eq)?;
            let expr = self.parse_or()?;
            let_nodes.push((name, expr));
        }

        let mut filter_clauses = Vec::new();
        while self.eat_keyword("FILTER") {
            filter_clauses.push(self.parse_or()?);
        }

        let collect = if self.eat_keyword("COLLECT") { Some(self.parse_collect(&for_clauses)?) } else { None };

        if let Some(collect) = collect {
            if for_clauses.len() != 1 {
                return Err(Error::invalid("COLLECT is only supported over a single FOR"));
            }
            let var = for_clauses[0].vars[0].clone();
            let collection = for_clauses[0].collection.clone().expect("non-traversal FOR has a collection");
            let mut equality_predicates = Vec::new();
            let mut range_predicates = Vec::new();
            let mut other_filters = Vec::new();
            for c in filter_clauses.iter().flat_map(split_and) {
                match classify_predicate(&c, &var) {
                    PredicateKind::Equality(field, value) => equality_predicates.push((field, value)),
                    PredicateKind::Range(rp) => range_predicates.push(rp),
                    PredicateKind::Other => other_filters.push(c),
                }
            }
            let main = Query::Conjunctive(ConjunctiveQuery {
                var: var.clone(),
                collection,
                equality_predicates,
                range_predicates,
                other_filters,
                let_nodes,
                order_by: None,
                limit: None,
                ret: Expr::Variable(var),
            });
            return Ok(Program { ctes: Vec::new(), collect: Some(collect), main });
        }

        let sort = if self.eat_keyword("SORT") {
            let expr = self.parse_or()?;
            let dir = if self.eat_keyword("DESC") {
                SortDir::Desc
            } else {
                self.eat_keyword("ASC");
                SortDir::Asc
            };
            Some((expr, dir))
        } else {
            None
        };

        let limit = if self.eat_keyword("LIMIT") { Some(self.parse_limit()?) } else { None };

        self.expect_keyword("RETURN")?;
        let ret = self.parse_or()?;

        if for_clauses.len() == 2 {
            let main = self.finish_join(for_clauses, let_nodes, filter_clauses, sort, limit, ret)?;
            return Ok(Program { ctes: Vec::new(), collect: None, main });
        }
        if for_clauses.len() != 1 {
            return Err(Error::invalid("only one or two FOR clauses are supported"));
        }

        let var = for_clauses[0].vars[0].clone();
        let collection = for_clauses[0].collection.clone().expect("non-traversal FOR has a collection");

        let order_by = sort.map(|(expr, dir)| match field_of(&expr, &var) {
            Some(field) => Ok((field, dir)),
            None => Err(Error::invalid("SORT on a single FOR must reference a field of the loop variable")),
        }).transpose()?;

        let conjuncts: Vec<Expr> = filter_clauses.iter().flat_map(split_and).collect();
        let has_top_level_or = filter_clauses.iter().any(|e| matches!(e, Expr::BinaryOp(BinOp::Or, ..)));

        let main = if has_top_level_or {
            if filter_clauses.len() != 1 {
                return Err(Error::invalid("a disjunctive FILTER must stand alone, not combined with other FILTER clauses"));
            }
            let disjuncts = to_dnf(&filter_clauses[0], &var)?;
            Query::Disjunctive(DisjunctiveQuery { var, collection, disjuncts, post_filter: None, order_by, limit, ret })
        } else {
            let mut equality_predicates = Vec::new();
            let mut range_predicates = Vec::new();
            let mut other_filters = Vec::new();
            for c in conjuncts {
                match classify_predicate(&c, &var) {
                    PredicateKind::Equality(field, value) => equality_predicates.push((field, value)),
                    PredicateKind::Range(rp) => range_predicates.push(rp),
                    PredicateKind::Other => other_filters.push(c),
                }
            }
            Query::Conjunctive(ConjunctiveQuery { var, collection, equality_predicates, range_predicates, other_filters, let_nodes, order_by, limit, ret })
        };

        Ok(Program { ctes: Vec::new(), collect: None, main })
    }

    fn parse_limit(&mut self) -> Result<(u64, u64)> {
        let a = self.parse_uint()?;
        if matches!(self.peek(), Token::Comma) {
            self.advance();
            let b = self.parse_uint()?;
            Ok((a, b))
        } else {
            Ok((0, a))
        }
    }

    fn parse_uint(&mut self) -> Result<u64> {
        match self.advance() {
            Token::Int(i) if i >= 0 => Ok(i as u64),
            other => Err(Error::invalid(format!("expected a non-negative integer, found {other:?}"))),
        }
    }

    fn parse_for_clauses(&mut self) -> Result<Vec<ForClauseSrc>> {
        let mut clauses = Vec::new();
        while self.eat_keyword("FOR") {
            let mut vars = vec![self.expect_ident()?];
            while matches!(self.peek(), Token::Comma) {
                self.advance();
                vars.push(self.expect_ident()?);
            }
            self.expect_keyword("IN")?;

            if vars.len() > 1 || self.looks_like_depth_range() {
                let traversal = self.parse_traversal_source()?;
                clauses.push(ForClauseSrc { vars, traversal: Some(traversal), collection: None });
            } else {
                let collection = self.expect_ident()?;
                clauses.push(ForClauseSrc { vars, traversal: None, collection: Some(collection) });
            }
        }
        if clauses.is_empty() {
            return Err(Error::invalid("a query must start with FOR"));
        }
        Ok(clauses)
    }

    fn looks_like_depth_range(&self) -> bool {
        matches!(self.peek(), Token::Int(_)) && matches!(self.tokens.get(self.pos + 1), Some(Token::DotDot))
    }

    fn parse_traversal_source(&mut self) -> Result<TraversalSrc> {
        let min_depth = self.parse_uint()? as u32;
        self.expect(&Token::DotDot)?;
        let max_depth = self.parse_uint()? as u32;
        let direction = if self.eat_keyword("OUTBOUND") {
            TraversalDirection::Out
        } else if self.eat_keyword("INBOUND") {
            TraversalDirection::In
        } else if self.eat_keyword("ANY") {
            TraversalDirection::Any
        } else {
            return Err(Error::invalid("expected OUTBOUND, INBOUND or ANY in a traversal"));
        };
        let start_expr = self.parse_or()?;
        let start_pk = match start_expr {
            Expr::Literal(Value::String(s)) => s,
            _ => return Err(Error::invalid("a traversal start must be a string literal")),
        };
        self.expect_keyword("GRAPH")?;
        let graph = self.expect_ident()?;
        Ok(TraversalSrc { min_depth, max_depth, direction, start_pk, graph })
    }

    fn finish_traversal(&mut self, clause: ForClauseSrc) -> Result<Program> {
        let traversal = clause.traversal.expect("caller checked traversal is Some");
        let mut vars = clause.vars.into_iter();
        let var_vertex = vars.next().ok_or_else(|| Error::invalid("a traversal FOR requires at least a vertex binding"))?;
        let var_edge = vars.next();
        let var_path = vars.next();

        let mut let_nodes = Vec::new();
        while self.eat_keyword("LET") {
            let name = self.expect_ident()?;
            self.expect(&Token::Eq)?;
            let expr = self.parse_or()?;
            let_nodes.push((name, expr));
        }

        let mut filters = Vec::new();
        while self.eat_keyword("FILTER") {
            filters.extend(split_and(&self.parse_or()?));
        }
        self.expect_keyword("RETURN")?;
        let ret = self.parse_or()?;

        let main = Query::Traversal(Box::new(TraversalQuery {
            var_vertex,
            var_edge,
            var_path,
            min_depth: traversal.min_depth,
            max_depth: traversal.max_depth,
            direction: traversal.direction,
            start_pk: traversal.start_pk,
            graph: traversal.graph,
            filters,
            let_nodes,
            ret,
        }));
        Ok(Program { ctes: Vec::new(), collect: None, main })
    }

    fn finish_join(
        &mut self,
        for_clauses: Vec<ForClauseSrc>,
        let_nodes: Vec<(String, Expr)>,
        filter_clauses: Vec<Expr>,
        sort: Option<(Expr, SortDir)>,
        limit: Option<(u64, u64)>,
        ret: Expr,
    ) -> Result<Query> {
        let left_var = for_clauses[0].vars[0].clone();
        let right_var = for_clauses[1].vars[0].clone();
        let left_collection = for_clauses[0].collection.clone().expect("join side has a collection");
        let right_collection = for_clauses[1].collection.clone().expect("join side has a collection");

        let mut conjuncts: Vec<Expr> = filter_clauses.iter().flat_map(split_and).collect();

        let mut join_key = None;
        let mut remaining = Vec::with_capacity(conjuncts.len());
        for c in conjuncts.drain(..) {
            if join_key.is_none() {
                if let Some(key) = as_equality_join(&c, &left_var, &right_var) {
                    join_key = Some(key);
                    continue;
                }
            }
            remaining.push(c);
        }

        let mut left_filters = Vec::new();
        let mut right_filters = Vec::new();
        let mut other_filters = Vec::new();
        for c in remaining {
            let vars = free_vars(&c);
            let touches_left = vars.contains(&left_var);
            let touches_right = vars.contains(&right_var);
            if touches_left && !touches_right {
                left_filters.push(c);
            } else if touches_right && !touches_left {
                right_filters.push(c);
            } else {
                other_filters.push(c);
            }
        }

        Ok(Query::Join(Box::new(JoinQuery {
            for_nodes: [ForNode { var: left_var, collection: left_collection }, ForNode { var: right_var, collection: right_collection }],
            join_key,
            left_filters,
            right_filters,
            other_filters,
            let_nodes,
            sort,
            limit,
            ret,
        })))
    }

    fn parse_collect(&mut self, for_clauses: &[ForClauseSrc]) -> Result<CollectClause> {
        if for_clauses.len() != 1 {
            return Err(Error::invalid("COLLECT is only supported over a single FOR"));
        }
        let key_name = self.expect_ident()?;
        self.expect(&Token::Eq)?;
        let key_expr = self.parse_or()?;

        let mut aggregates = Vec::new();
        if self.eat_keyword("AGGREGATE") {
            loop {
                let result_name = self.expect_ident()?;
                self.expect(&Token::Eq)?;
                let func_name = self.expect_ident()?;
                let func = match func_name.to_ascii_uppercase().as_str() {
                    "COUNT" => AggFunc::Count,
                    "SUM" => AggFunc::Sum,
                    "AVG" => AggFunc::Avg,
                    "MIN" => AggFunc::Min,
                    "MAX" => AggFunc::Max,
                    other => return Err(Error::invalid(format!("unknown aggregate function '{other}'"))),
                };
                self.expect(&Token::LParen)?;
                let arg = if matches!(self.peek(), Token::RParen) { None } else { Some(self.parse_or()?) };
                self.expect(&Token::RParen)?;
                aggregates.push((result_name, func, arg));
                if matches!(self.peek(), Token::Comma) {
                    self.advance();
                    continue;
                }
                break;
            }
        }

        let having = if self.eat_keyword("HAVING") { Some(self.parse_or()?) } else { None };

        self.expect_keyword("RETURN")?;
        let ret = self.parse_or()?;

        Ok(CollectClause { group_key: (key_name, key_expr), aggregates, having, ret })
    }

    // ---- expressions, lowest to highest precedence ----

    fn parse_or(&mut self) -> Result<Expr> {
        let mut lhs = self.parse_and()?;
        while self.eat_keyword("OR") {
            let rhs = self.parse_and()?;
            lhs = Expr::BinaryOp(BinOp::Or, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_and(&mut self) -> Result<Expr> {
        let mut lhs = self.parse_cmp()?;
        while self.eat_keyword("AND") {
            let rhs = self.parse_cmp()?;
            lhs = Expr::BinaryOp(BinOp::And, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_cmp(&mut self) -> Result<Expr> {
        let lhs = self.parse_add()?;
        let op = match self.peek() {
            Token::Eq => Some(BinOp::Eq),
            Token::Neq => Some(BinOp::Neq),
            Token::Lt => Some(BinOp::Lt),
            Token::Le => Some(BinOp::Le),
            Token::Gt => Some(BinOp::Gt),
            Token::Ge => Some(BinOp::Ge),
            _ => None,
        };
        if let Some(op) = op {
            self.advance();
            let rhs = self.parse_add()?;
            return Ok(Expr::BinaryOp(op, Box::new(lhs), Box::new(rhs)));
        }
        if self.is_keyword("IN") {
            self.advance();
            let rhs = self.parse_add()?;
            return Ok(Expr::BinaryOp(BinOp::In, Box::new(lhs), Box::new(rhs)));
        }
        Ok(lhs)
    }

    fn parse_add(&mut self) -> Result<Expr> {
        let mut lhs = self.parse_mul()?;
        loop {
            let op = match self.peek() {
                Token::Plus => BinOp::Add,
                Token::Minus => BinOp::Sub,
                _ => break,
            };
            self.advance();
            let rhs = self.parse_mul()?;
            lhs = Expr::BinaryOp(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_mul(&mut self) -> Result<Expr> {
        let mut lhs = self.parse_unary()?;
        loop {
            let op = match self.peek() {
                Token::Star => BinOp::Mul,
                Token::Slash => BinOp::Div,
                _ => break,
            };
            self.advance();
            let rhs = self.parse_unary()?;
            lhs = Expr::BinaryOp(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> Result<Expr> {
        if self.eat_keyword("NOT") {
            return Ok(Expr::UnaryOp(UnaryOp::Not, Box::new(self.parse_unary()?)));
        }
        if matches!(self.peek(), Token::Minus) {
            self.advance();
            return Ok(Expr::UnaryOp(UnaryOp::Neg, Box::new(self.parse_unary()?)));
        }
        self.parse_postfix()
    }

    fn parse_postfix(&mut self) -> Result<Expr> {
        let mut expr = self.parse_primary()?;
        loop {
            match self.peek() {
                Token::Dot => {
                    self.advance();
                    let field = self.expect_ident()?;
                    expr = Expr::FieldAccess(Box::new(expr), field);
                }
                _ => break,
            }
        }
        Ok(expr)
    }

    fn parse_primary(&mut self) -> Result<Expr> {
        match self.advance() {
            Token::Int(i) => Ok(Expr::Literal(Value::Int(i))),
            Token::Float(f) => Ok(Expr::Literal(Value::Double(f))),
            Token::Str(s) => Ok(Expr::Literal(Value::String(s))),
            Token::LBracket => {
                let mut items = Vec::new();
                if !matches!(self.peek(), Token::RBracket) {
                    loop {
                        items.push(self.parse_or()?);
                        if matches!(self.peek(), Token::Comma) {
                            self.advance();
                            continue;
                        }
                        break;
                    }
                }
                self.expect(&Token::RBracket)?;
                Ok(Expr::ArrayLit(items))
            }
            Token::LBrace => {
                let mut fields = Vec::new();
                if !matches!(self.peek(), Token::RBrace) {
                    loop {
                        let key = match self.advance() {
                            Token::Ident(s) => s,
                            Token::Str(s) => s,
                            other => return Err(Error::invalid(format!("expected an object key, found {other:?}"))),
                        };
                        self.expect(&Token::Colon)?;
                        let value = self.parse_or()?;
                        fields.push((key, value));
                        if matches!(self.peek(), Token::Comma) {
                            self.advance();
                            continue;
                        }
                        break;
                    }
                }
                self.expect(&Token::RBrace)?;
                Ok(Expr::ObjectCtor(fields))
            }
            Token::LParen => {
                let inner = self.parse_or()?;
                self.expect(&Token::RParen)?;
                Ok(inner)
            }
            Token::Ident(name) => {
                if name.eq_ignore_ascii_case("true") {
                    return Ok(Expr::Literal(Value::Bool(true)));
                }
                if name.eq_ignore_ascii_case("false") {
                    return Ok(Expr::Literal(Value::Bool(false)));
                }
                if name.eq_ignore_ascii_case("null") {
                    return Ok(Expr::Literal(Value::Null));
                }
                if matches!(self.peek(), Token::LParen) {
                    self.advance();
                    let mut args = Vec::new();
                    if !matches!(self.peek(), Token::RParen) {
                        loop {
                            args.push(self.parse_or()?);
                            if matches!(self.peek(), Token::Comma) {
                                self.advance();
                                continue;
                            }
                            break;
                        }
                    }
                    self.expect(&Token::RParen)?;
                    return Ok(Expr::FunctionCall(name, args));
                }
                Ok(Expr::Variable(name))
            }
            other => Err(Error::invalid(format!("unexpected token {other:?} in expression"))),
        }
    }
}

enum PredicateKind {
    Equality(String, Expr),
    Range(RangePredicate),
    Other,
}

fn classify_predicate(expr: &Expr, var: &str) -> PredicateKind {
    if let Expr::BinaryOp(op, lhs, rhs) = expr {
        let (field_side, value_side, flipped) = match (field_of(lhs, var), field_of(rhs, var)) {
            (Some(f), None) => (Some(f), rhs.as_ref(), false),
            (None, Some(f)) => (Some(f), lhs.as_ref(), true),
            _ => (None, rhs.as_ref(), false),
        };
        if let Some(field) = field_side {
            if is_constant(value_side) {
                let cmp_op = match (op, flipped) {
                    (BinOp::Eq, _) => Some(CmpOp::Eq),
                    (BinOp::Neq, _) => Some(CmpOp::Neq),
                    (BinOp::Lt, false) => Some(CmpOp::Lt),
                    (BinOp::Lt, true) => Some(CmpOp::Gt),
                    (BinOp::Le, false) => Some(CmpOp::Le),
                    (BinOp::Le, true) => Some(CmpOp::Ge),
                    (BinOp::Gt, false) => Some(CmpOp::Gt),
                    (BinOp::Gt, true) => Some(CmpOp::Lt),
                    (BinOp::Ge, false) => Some(CmpOp::Ge),
                    (BinOp::Ge, true) => Some(CmpOp::Le),
                    _ => None,
                };
                if let Some(cmp_op) = cmp_op {
                    return if matches!(cmp_op, CmpOp::Eq) {
                        PredicateKind::Equality(field, value_side.clone())
                    } else {
                        PredicateKind::Range(RangePredicate { field, op: cmp_op, value: value_side.clone() })
                    };
                }
            }
        }
    }
    PredicateKind::Other
}

/// `var.field` pattern match.
fn field_of(expr: &Expr, var: &str) -> Option<String> {
    match expr {
        Expr::FieldAccess(base, field) => match base.as_ref() {
            Expr::Variable(v) if v == var => Some(field.clone()),
            _ => None,
        },
        _ => None,
    }
}

fn is_constant(expr: &Expr) -> bool {
    matches!(expr, Expr::Literal(_) | Expr::ArrayLit(_))
}

fn as_equality_join(expr: &Expr, left_var: &str, right_var: &str) -> Option<(String, String)> {
    if let Expr::BinaryOp(BinOp::Eq, lhs, rhs) = expr {
        if let (Some(lf), Some(rf)) = (field_of(lhs, left_var), field_of(rhs, right_var)) {
            return Some((lf, rf));
        }
        if let (Some(rf), Some(lf)) = (field_of(lhs, right_var), field_of(rhs, left_var)) {
            return Some((lf, rf));
        }
    }
    None
}

fn split_and(expr: &Expr) -> Vec<Expr> {
    match expr {
        Expr::BinaryOp(BinOp::And, lhs, rhs) => {
            let mut v = split_and(lhs);
            v.extend(split_and(rhs));
            v
        }
        other => vec![other.clone()],
    }
}

fn free_vars(expr: &Expr) -> std::collections::HashSet<String> {
    let mut out = std::collections::HashSet::new();
    collect_free_vars(expr, &mut out);
    out
}

fn collect_free_vars(expr: &Expr, out: &mut std::collections::HashSet<String>) {
    match expr {
        Expr::Variable(name) => {
            out.insert(name.clone());
        }
        Expr::FieldAccess(base, _) => collect_free_vars(base, out),
        Expr::BinaryOp(_, l, r) => {
            collect_free_vars(l, out);
            collect_free_vars(r, out);
        }
        Expr::UnaryOp(_, inner) => collect_free_vars(inner, out),
        Expr::FunctionCall(_, args) => args.iter().for_each(|a| collect_free_vars(a, out)),
        Expr::ArrayLit(items) => items.iter().for_each(|a| collect_free_vars(a, out)),
        Expr::ObjectCtor(fields) => fields.iter().for_each(|(_, v)| collect_free_vars(v, out)),
        Expr::Literal(_) => {}
        Expr::Subquery(_) | Expr::QuantifiedSubquery { .. } => {}
    }
}

/// DNF-converts a top-level `OR` of equality atoms on `var`. Any atom that
/// is not a plain `var.field == constant` fails the conversion.
fn to_dnf(expr: &Expr, var: &str) -> Result<Vec<Disjunct>> {
    match expr {
        Expr::BinaryOp(BinOp::Or, l, r) => {
            let mut left = to_dnf(l, var)?;
            left.extend(to_dnf(r, var)?);
            Ok(left)
        }
        Expr::BinaryOp(BinOp::And, l, r) => {
            let lefts = to_dnf(l, var)?;
            let rights = to_dnf(r, var)?;
            let mut out = Vec::with_capacity(lefts.len() * rights.len());
            for lhs in &lefts {
                for rhs in &rights {
                    let mut merged = lhs.clone();
                    merged.extend(rhs.clone());
                    out.push(merged);
                }
            }
            Ok(out)
        }
        Expr::BinaryOp(BinOp::Eq, lhs, rhs) => match (field_of(lhs, var), rhs.as_ref()) {
            (Some(field), value) if is_constant(value) => Ok(vec![vec![(field, value.clone())]]),
            _ => Err(Error::invalid("a disjunctive FILTER must be built from 'var.field == constant' atoms")),
        },
        _ => Err(Error::invalid("a disjunctive FILTER must be built from 'var.field == constant' atoms")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_simple_conjunctive_query() {
        let program = parse("FOR u IN users FILTER u.age >= 21 AND u.country == 'US' SORT u.name LIMIT 10 RETURN u").unwrap();
        match program.main {
            Query::Conjunctive(q) => {
                assert_eq!(q.var, "u");
                assert_eq!(q.collection, "users");
                assert_eq!(q.equality_predicates.len(), 1);
                assert_eq!(q.range_predicates.len(), 1);
                assert!(q.order_by.is_some());
                assert_eq!(q.limit, Some((0, 10)));
            }
            _ => panic!("expected a conjunctive query"),
        }
    }

    #[test]
    fn parses_two_for_as_join() {
        let program = parse("FOR u IN users FOR o IN orders FILTER o.user_id == u._key LIMIT 100 RETURN u").unwrap();
        match program.main {
            Query::Join(q) => {
                assert!(q.join_key.is_some());
                assert_eq!(q.limit, Some((0, 100)));
            }
            _ => panic!("expected a join query"),
        }
    }

    #[test]
    fn parses_disjunctive_filter_into_dnf() {
        let program = parse("FOR p IN products FILTER p.category == 'a' OR p.category == 'b' RETURN p").unwrap();
        match program.main {
            Query::Disjunctive(q) => assert_eq!(q.disjuncts.len(), 2),
            _ => panic!("expected a disjunctive query"),
        }
    }

    #[test]
    fn parses_traversal_query() {
        let program = parse("FOR v, e, p IN 1..3 OUTBOUND 'users/1' GRAPH follows FILTER v.active == true RETURN v").unwrap();
        match program.main {
            Query::Traversal(q) => {
                assert_eq!(q.min_depth, 1);
                assert_eq!(q.max_depth, 3);
                assert_eq!(q.start_pk, "users/1");
                assert_eq!(q.graph, "follows");
            }
            _ => panic!("expected a traversal query"),
        }
    }

    #[test]
    fn parses_collect_with_aggregate_and_having() {
        let program = parse(
            "FOR s IN sales COLLECT region = s.region AGGREGATE total = SUM(s.amount) HAVING total > 100 RETURN {region, total}",
        )
        .unwrap();
        let collect = program.collect.expect("collect clause expected");
        assert_eq!(collect.group_key.0, "region");
        assert_eq!(collect.aggregates.len(), 1);
        assert!(collect.having.is_some());
    }

    #[test]
    fn rejects_trailing_garbage() {
        assert!(parse("FOR u IN users RETURN u EXTRA").is_err());
    }
}
